//! Access control — grants, people, and devices.
//!
//! A grant ties a (resource_type, resource_id) to a (subject_type,
//! subject_id) at a permission tier, where `admin` >= `write` >= `read`.
//! People and devices are the non-agent subjects grants can name.

pub mod devices;
pub mod grants;
pub mod people;
