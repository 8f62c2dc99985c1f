// Domain layer: deployment data model and capability interfaces (Host, Service).

pub mod model;
pub mod ports;
