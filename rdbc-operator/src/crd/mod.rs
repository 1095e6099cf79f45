//! Custom Resource Definitions for the rdbc operator.
//!
//! - [`Rdbc`]: a Redis database claimed by an application namespace

mod rdbc;

pub use rdbc::{
    DATABASE_FINALIZER, DATABASE_NAME_ANNOTATION, DATABASE_UID_ANNOTATION, Rdbc, RdbcPhase,
    RdbcSpec, RdbcStatus, RecordKey, SIZE_MEGABYTES_ANNOTATION,
};
