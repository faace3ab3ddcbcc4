//! Port enumeration.
//!
//! Each listing runs on its own transient default handle, released on every exit
//! path by [`PortHandle`]'s drop.

use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::port::{Direction, HandleOptions, PortHandle, PortInfo};
use std::sync::Arc;
use tracing::debug;

pub fn list_readable_ports(driver: &Arc<dyn Driver>) -> Result<Vec<PortInfo>> {
    list_ports(driver, Direction::Readable)
}

pub fn list_writable_ports(driver: &Arc<dyn Driver>) -> Result<Vec<PortInfo>> {
    list_ports(driver, Direction::Writable)
}

pub fn list_ports(driver: &Arc<dyn Driver>, direction: Direction) -> Result<Vec<PortInfo>> {
    let handle = PortHandle::create(Arc::clone(driver), direction, &HandleOptions::default())?;
    let raw = handle.live("enumerate")?;

    let count = driver.port_count(raw);
    let count = usize::try_from(count).map_err(|_| {
        Error::Enumeration(format!("driver reported {} {} ports", count, direction))
    })?;

    let ports = (0..count)
        .map(|index| {
            driver
                .port_name(raw, index)
                .map(|name| PortInfo::new(name, index, direction))
                .map_err(|e| {
                    Error::Enumeration(format!("name of {} port {}: {}", direction, index, e))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!("Enumerated {} {} MIDI ports", ports.len(), direction);
    Ok(ports)
}
