use crate::errors::CallError;

/// A camera reported by the platform enumerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraInfo {
    pub device_name: String,
    pub front_facing: bool,
}

/// Where local video comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    Camera { device_name: String },
    Screen,
}

/// Pick a capture source: the screen when asked for, otherwise the first
/// front-facing camera, then any other camera.
pub fn select_capture(cameras: &[CameraInfo], screen: bool) -> Result<CaptureSource, CallError> {
    if screen {
        tracing::info!("using screen capture");
        return Ok(CaptureSource::Screen);
    }

    let front = cameras.iter().find(|c| c.front_facing);
    let camera = front.or_else(|| cameras.first()).ok_or_else(|| {
        CallError::Capture("Failed to open camera".to_string())
    })?;

    tracing::info!(
        "using camera {} (front facing: {})",
        camera.device_name,
        camera.front_facing
    );
    Ok(CaptureSource::Camera {
        device_name: camera.device_name.clone(),
    })
}
