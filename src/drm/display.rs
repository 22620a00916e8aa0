//! Display negotiation
//!
//! One connected connector, a CRTC that can drive it, and a mode. The
//! result never changes while the loop runs.

use anyhow::{anyhow, Context, Result};
use drm::control::{connector, crtc, Device as ControlDevice, Mode, ModeTypeFlags, ResourceHandles};
use log::{debug, info, warn};

use super::device::Device;

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    pub connector_handle: connector::Handle,
    pub crtc_handle: crtc::Handle,
    pub mode: Mode,
    pub width: u32,
    pub height: u32,
}

impl DisplayConfig {
    pub fn negotiate(device: &Device) -> Result<Self> {
        let res = device
            .resource_handles()
            .context("Failed to get DRM resources")?;
        debug!(
            "{}: {} connectors, {} CRTCs, {} encoders",
            device.path().display(),
            res.connectors().len(),
            res.crtcs().len(),
            res.encoders().len()
        );

        let connector = connected_connector(device, &res)?;
        let mode = select_mode(connector.modes())
            .ok_or_else(|| anyhow!("Connector {:?} reports no modes", connector.handle()))?;
        let crtc_handle = crtc_for_connector(device, &res, &connector)?;

        let (width, height) = mode.size();
        info!(
            "Display: {:?}-{} on {:?}, {}x{}@{}",
            connector.interface(),
            connector.interface_id(),
            crtc_handle,
            width,
            height,
            mode.vrefresh()
        );

        Ok(Self {
            connector_handle: connector.handle(),
            crtc_handle,
            mode,
            width: width.into(),
            height: height.into(),
        })
    }
}

fn connected_connector(device: &Device, res: &ResourceHandles) -> Result<connector::Info> {
    for &handle in res.connectors() {
        let info = device
            .get_connector(handle, false)
            .with_context(|| format!("Failed to query connector {:?}", handle))?;
        if info.state() == connector::State::Connected {
            return Ok(info);
        }
    }
    Err(anyhow!("No connected connector"))
}

/// Preferred mode, else the first listed
fn select_mode(modes: &[Mode]) -> Option<Mode> {
    modes
        .iter()
        .find(|m| m.mode_type().contains(ModeTypeFlags::PREFERRED))
        .or_else(|| modes.first())
        .copied()
}

/// The CRTC already lit by the connector's encoder, else any compatible one
fn crtc_for_connector(
    device: &Device,
    res: &ResourceHandles,
    connector: &connector::Info,
) -> Result<crtc::Handle> {
    if let Some(crtc) = connector
        .current_encoder()
        .and_then(|enc| device.get_encoder(enc).ok())
        .and_then(|enc| enc.crtc())
    {
        return Ok(crtc);
    }

    connector
        .encoders()
        .iter()
        .filter_map(|&enc| device.get_encoder(enc).ok())
        .find_map(|enc| res.filter_crtcs(enc.possible_crtcs()).into_iter().next())
        .ok_or_else(|| anyhow!("No CRTC can drive connector {:?}", connector.handle()))
}

/// CRTC state found at startup, put back on exit
pub struct SavedCrtc {
    info: crtc::Info,
    connector: connector::Handle,
}

impl SavedCrtc {
    pub fn save(device: &Device, config: &DisplayConfig) -> Result<Self> {
        let info = device
            .get_crtc(config.crtc_handle)
            .context("Failed to save CRTC state")?;
        Ok(Self {
            info,
            connector: config.connector_handle,
        })
    }

    pub fn restore(&self, device: &Device) {
        let Some(fb) = self.info.framebuffer() else {
            debug!("CRTC {:?} was off, nothing to restore", self.info.handle());
            return;
        };
        if let Err(e) = device.set_crtc(
            self.info.handle(),
            Some(fb),
            self.info.position(),
            &[self.connector],
            self.info.mode(),
        ) {
            warn!("Failed to restore CRTC {:?}: {}", self.info.handle(), e);
        }
    }
}
