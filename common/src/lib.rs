pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod panel;
pub mod power;
pub mod presence;
pub mod router;
pub mod surface;
pub mod topics;
pub mod types;

pub use clock::{ClockLabel, CLOCK_PLACEHOLDER};
pub use config::{DisplayConfig, LampLabels, MqttConfig, NetworkConfig, PanelConfig, TopicConfig};
pub use dispatcher::{on_user_activate, toggle_command, Activation};
pub use engine::{LampEntity, ReconciliationEngine, SensorReading};
pub use error::PanelError;
pub use panel::{LampView, Panel, PanelView};
pub use power::{DisplayPower, IdleArm};
pub use presence::{ConnectPlan, PresencePublisher};
pub use router::{derive_on, InboundEvent, TopicRouter};
pub use surface::{RenderSurface, Transport};
pub use topics::*;
pub use types::{
    ConnectivityState, LampId, LastWill, OutboundMessage, PowerState, Qos, RenderCommand,
    SensorText,
};
