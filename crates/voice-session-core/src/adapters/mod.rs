// Adapters for the voice SDK, the agent hub and the token endpoint
pub mod device;
pub mod hub_ws;
pub mod presence_hub;
pub mod token_client;

pub use device::{normalize_destination, ConnectParams, DeviceDriver, SdkEvent, VoiceDeviceAdapter};
pub use hub_ws::WebSocketHubTransport;
pub use presence_hub::{HubHandle, HubTransport, HubTransportEvent, PresenceHubClient};
pub use token_client::{HttpTokenClient, TokenProvider};
