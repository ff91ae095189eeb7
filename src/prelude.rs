pub use std::io::Write;

pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use tokio::sync::broadcast;

pub use crate::channels::Channels;
pub use crate::config::{Config, ConfigWrapper};
pub use crate::options::Options;
pub use crate::utils::Utils;

pub use crate::{channels, config, coordinator, home_assistant, mqtt};
