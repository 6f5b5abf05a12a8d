//! Services
//! Order / Shipment / Return の状態遷移を扱うドメインロジック

pub mod orders;
pub mod returns;
pub mod shipments;

pub use orders::OrderService;
pub use returns::ReturnWorkflow;
pub use shipments::{CreatedShipment, PickupLocations, Serviceability, ShipmentService};
