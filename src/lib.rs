pub mod color;
pub mod device;
pub mod intent;
pub mod optimistic;
pub mod pipeline;
pub mod preset;
pub mod store;
pub mod throttle;
pub mod transition;
pub mod transport;
pub mod wire;

pub use color::{
    ColorStop, Gradient, Rgb, TemperatureAnchors, TemperatureModel, kelvin_to_rgb,
};
pub use device::{ControllerError, DeviceController, DeviceSnapshot};
pub use intent::{ColorIntent, ColorMode, DeviceId, build_intent};
pub use optimistic::{OptimisticStateCoordinator, RECONCILE_DEADLINE};
pub use pipeline::{ColorPipeline, PipelineError};
pub use preset::{Preset, PresetDevice, PresetPayload, PresetSyncCoordinator};
pub use store::{JsonFileStore, KvStore, MemoryStore, StoreError};
pub use throttle::{EditPhase, EditScope, StreamThrottler};
pub use transition::{TransitionEngine, TransitionFrame, TransitionSpec, TransitionState};
pub use transport::{HttpTransport, TransportError};
pub use wire::{DeviceCapabilities, DeviceView, SegmentInfo};

/// Abstract device transport
///
/// Implement this trait to support different ways of reaching a
/// controller. The engine is generic over it; tests substitute a
/// recording transport, production uses [`HttpTransport`].
pub trait DeviceTransport: Send + Sync {
    /// Read a document from the device.
    fn get(&self, path: &str) -> Result<String, TransportError>;

    /// Write a document to the device and return the response body.
    fn post(&self, path: &str, body: &str) -> Result<String, TransportError>;
}

impl<T: DeviceTransport + ?Sized> DeviceTransport for std::sync::Arc<T> {
    fn get(&self, path: &str) -> Result<String, TransportError> {
        (**self).get(path)
    }

    fn post(&self, path: &str, body: &str) -> Result<String, TransportError> {
        (**self).post(path, body)
    }
}
