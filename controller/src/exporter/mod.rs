//! Exporter-side state (§4.6): Register/Status/Unregister reconciliation plus the process-local
//! Listen session registry that backs the Online condition while a stream is open (§5).

mod listen;
mod reconciler;

pub use listen::{AlreadyListening, ListenHandle, ListenRegistry};
pub use reconciler::{
    on_listen_connected, on_listen_disconnected, register, report_status, unregister, ExporterReconcileError,
    EXPORTER_LABEL_PREFIX,
};
