/*!
 * Monitoring Module
 * Logging setup and operation tracing
 */

pub mod tracer;

pub use tracer::{generate_trace_id, init_tracing, span_operation, OperationSpan};
