//! Virtual device injection via uinput
//!
//! Every grabbed keyboard gets its own virtual keyboard, so the session
//! sees one output device per physical one and per-device key state never
//! mixes. The virtual device also mirrors the non-key capabilities of the
//! physical one (trackpoint, wheel, switches), whose events are forwarded
//! unchanged.

use std::path::Path;

use chordmap_config::Modifier;
use evdev::uinput::VirtualDeviceBuilder;
use evdev::{
    AbsInfo, AttributeSet, AttributeSetRef, Device, InputEvent, Key, MiscType,
    PropType, RelativeAxisType, SwitchType, UinputAbsSetup,
};
use nix::unistd::AccessFlags;

use crate::error::DeviceError;
use crate::event::{KeyEvent, KeySink};
use crate::mapping::MappingTable;

/// Name prefix of every virtual device this daemon creates.
///
/// Devices carrying it are never grabbed, which keeps the daemon from
/// reading its own output.
pub const VIRTUAL_DEVICE_PREFIX: &str = "chordmap-";

const UINPUT_PATH: &str = "/dev/uinput";

/// Fail early with a readable error if uinput is not writable.
pub fn check_uinput_access() -> Result<(), DeviceError> {
    nix::unistd::access(UINPUT_PATH, AccessFlags::W_OK).map_err(|source| {
        DeviceError::UinputAccess {
            path: Path::new(UINPUT_PATH).to_path_buf(),
            source,
        }
    })
}

/// Keys a virtual keyboard must advertise: everything the physical device
/// has, every destination key, and every modifier.
pub fn output_keys(physical: Option<&AttributeSetRef<Key>>, table: &MappingTable) -> AttributeSet<Key> {
    let mut keys = AttributeSet::<Key>::new();

    if let Some(physical) = physical {
        for key in physical.iter() {
            keys.insert(key);
        }
    }
    for key in table.destination_keys() {
        keys.insert(key);
    }
    for modifier in Modifier::ALL {
        keys.insert(modifier.to_key());
    }

    keys
}

/// Non-key capabilities of a physical keyboard, mirrored on its virtual one.
pub struct PassthroughCapabilities {
    relative_axes: Option<AttributeSet<RelativeAxisType>>,
    absolute_axes: Vec<UinputAbsSetup>,
    switches: Option<AttributeSet<SwitchType>>,
    misc: Option<AttributeSet<MiscType>>,
    properties: Option<AttributeSet<PropType>>,
}

impl PassthroughCapabilities {
    /// Read the capabilities of `device`.
    ///
    /// Absolute axes are mirrored with their current ranges; if those cannot
    /// be read the axes are left out.
    pub fn of(device: &Device) -> Self {
        let absolute_axes = match (device.supported_absolute_axes(), device.get_abs_state()) {
            (Some(axes), Ok(state)) => axes
                .iter()
                .map(|axis| {
                    let info = state[axis.0 as usize];
                    UinputAbsSetup::new(
                        axis,
                        AbsInfo::new(
                            info.value,
                            info.minimum,
                            info.maximum,
                            info.fuzz,
                            info.flat,
                            info.resolution,
                        ),
                    )
                })
                .collect(),
            (Some(_), Err(e)) => {
                tracing::warn!(
                    "Cannot read absolute axes of '{}', not mirroring them: {}",
                    device.name().unwrap_or("Unknown"),
                    e
                );
                Vec::new()
            }
            (None, _) => Vec::new(),
        };

        let properties = device.properties();
        Self {
            relative_axes: device.supported_relative_axes().map(|axes| axes.iter().collect()),
            absolute_axes,
            switches: device.supported_switches().map(|switches| switches.iter().collect()),
            misc: device.misc_properties().map(|misc| misc.iter().collect()),
            properties: (properties.iter().next().is_some()).then(|| properties.iter().collect()),
        }
    }
}

/// A virtual keyboard mirroring one physical keyboard.
pub struct VirtualKeyboard {
    name: String,
    device: evdev::uinput::VirtualDevice,
}

impl VirtualKeyboard {
    /// Create `chordmap-<physical name>` advertising `keys` plus `extra`.
    pub fn new(
        physical_name: &str,
        keys: &AttributeSetRef<Key>,
        extra: &PassthroughCapabilities,
    ) -> Result<Self, DeviceError> {
        let name = format!("{}{}", VIRTUAL_DEVICE_PREFIX, physical_name);
        let to_error = |source| DeviceError::VirtualDevice {
            name: name.clone(),
            source,
        };

        let mut builder = VirtualDeviceBuilder::new()
            .map_err(to_error)?
            .name(&name)
            .with_keys(keys)
            .map_err(to_error)?;
        if let Some(axes) = &extra.relative_axes {
            builder = builder.with_relative_axes(axes).map_err(to_error)?;
        }
        for axis in &extra.absolute_axes {
            builder = builder.with_absolute_axis(axis).map_err(to_error)?;
        }
        if let Some(switches) = &extra.switches {
            builder = builder.with_switches(switches).map_err(to_error)?;
        }
        if let Some(misc) = &extra.misc {
            builder = builder.with_msc(misc).map_err(to_error)?;
        }
        if let Some(properties) = &extra.properties {
            builder = builder.with_properties(properties).map_err(to_error)?;
        }
        let device = builder.build().map_err(to_error)?;

        tracing::debug!("Created virtual device '{}'", name);
        Ok(Self { name, device })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl VirtualKeyboard {
    // `VirtualDevice::emit` terminates every batch with a SYN_REPORT
    fn write_frame(&mut self, frame: &[InputEvent]) -> Result<(), DeviceError> {
        self.device.emit(frame).map_err(|source| DeviceError::Write {
            name: self.name.clone(),
            source,
        })
    }
}

impl KeySink for VirtualKeyboard {
    fn emit(&mut self, events: &[KeyEvent]) -> Result<(), DeviceError> {
        for event in events {
            self.write_frame(&[event.to_input_event()])?;
        }
        Ok(())
    }

    fn forward(&mut self, frame: &[InputEvent]) -> Result<(), DeviceError> {
        self.write_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chordmap_config::parse_combination;
    use chordmap_config::Mapping;

    #[test]
    fn test_output_keys_cover_destinations_and_modifiers() {
        let table = MappingTable::new(vec![Mapping {
            src: parse_combination("alt+l").unwrap(),
            dst: parse_combination("ctrl+f13").unwrap(),
            filter: None,
        }]);

        let mut physical = AttributeSet::<Key>::new();
        physical.insert(Key::KEY_A);
        physical.insert(Key::KEY_L);

        let keys = output_keys(Some(&physical), &table);
        for key in [
            Key::KEY_A,
            Key::KEY_L,
            Key::KEY_F13,
            Key::KEY_LEFTCTRL,
            Key::KEY_LEFTSHIFT,
            Key::KEY_LEFTALT,
            Key::KEY_LEFTMETA,
        ] {
            assert!(keys.contains(key), "missing {:?}", key);
        }
        assert!(!keys.contains(Key::KEY_B));
    }

    #[test]
    fn test_output_keys_without_physical_set() {
        let keys = output_keys(None, &MappingTable::default());
        assert_eq!(keys.iter().count(), Modifier::ALL.len());
    }
}
