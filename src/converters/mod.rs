// Converters module - wire format → domain conversion
//
// Both deployment flavours describe the same things with different shapes.
// It follows a layered architecture:
// - core: timestamp/duration parsing and batch records shared by both
// - installer_to_domain: enveloped snake_case records → domain
// - container_to_domain: camelCase instance records → domain

pub mod container_to_domain;
pub mod core;
pub mod installer_to_domain;
