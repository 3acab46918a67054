//! Device commands built on [`EComHandle::set_command`] and
//! [`EComHandle::get_command`].

use strum::{Display, EnumIter, EnumString};

use crate::ecom::EComHandle;
use crate::error::{EComError, EComResult};
use crate::ids::{cmd, MsgClass};
use crate::transport::Transport;

/// Action applied to the device settings. The device reboots afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "kebab-case")]
#[repr(u8)]
pub enum SettingsAction {
    /// Reboot without touching the settings
    RebootOnly = 0,
    /// Save the current settings to non-volatile memory
    SaveSettings = 1,
    /// Restore and save the factory settings
    RestoreDefaultSettings = 2,
}

/// Apply a settings action (`CMD_0` / `SETTINGS_ACTION`, 1-byte payload).
pub fn settings_action<T: Transport>(handle: &mut EComHandle<T>, action: SettingsAction) -> EComResult<()> {
    handle.set_command(MsgClass::Cmd0.as_u8(), cmd::SETTINGS_ACTION, &[action as u8])
}

/// Set a model identifier held by command `(msg_class, msg_id)`.
pub fn generic_set_model_id<T: Transport>(
    handle: &mut EComHandle<T>,
    msg_class: u8,
    msg_id: u8,
    model_id: u32,
) -> EComResult<()> {
    handle.set_command(msg_class, msg_id, &model_id.to_le_bytes())
}

/// Read a model identifier held by command `(msg_class, msg_id)`.
///
/// # Errors
///
/// [`EComError::InvalidFrame`] if the reply is shorter than 4 bytes.
pub fn generic_get_model_id<T: Transport>(handle: &mut EComHandle<T>, msg_class: u8, msg_id: u8) -> EComResult<u32> {
    let payload = handle.get_command(msg_class, msg_id, &[])?;

    let bytes: [u8; 4] = payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            EComError::InvalidFrame(format!("model id reply too short: {} bytes", payload.len()))
        })?;
    Ok(u32::from_le_bytes(bytes))
}
