pub mod imports;
pub mod liveness;
pub mod readiness;
