use nix::{errno::Errno, net::if_::if_nametoindex};

use crate::core::errors::{Error, Result};

/// Resolve a network device name into its interface index.
pub(crate) fn interface_index(name: &str) -> Result<u32> {
    match if_nametoindex(name) {
        Ok(index) => Ok(index),
        Err(Errno::ENODEV | Errno::ENXIO) => Err(Error::InterfaceNotFound(name.to_string())),
        Err(e) => Err(Error::Interface {
            name: name.to_string(),
            reason: e.desc().to_string(),
        }),
    }
}
