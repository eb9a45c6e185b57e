// Config partition
// SPIFFS mounted at /spiffs holding the operator-provisioned config.json.
// The partition is never formatted on a failed mount so a damaged file can
// still be recovered over the serial console.

use std::ffi::CStr;

/// Label of the SPIFFS row in `partitions.csv`
pub const PARTITION_LABEL: &CStr = c"spiffs";

pub const MOUNT_POINT: &CStr = c"/spiffs";

/// Location of the device configuration document
pub const CONFIG_PATH: &str = "/spiffs/config.json";

#[cfg(target_os = "espidf")]
pub use esp::mount_config_partition;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_sys::{esp, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register, EspError};
    use log::info;

    use super::{MOUNT_POINT, PARTITION_LABEL};

    const MAX_OPEN_FILES: usize = 4;

    /// Mount the `spiffs` partition at `/spiffs`
    pub fn mount_config_partition() -> Result<(), EspError> {
        let conf = esp_vfs_spiffs_conf_t {
            base_path: MOUNT_POINT.as_ptr(),
            partition_label: PARTITION_LABEL.as_ptr(),
            max_files: MAX_OPEN_FILES,
            format_if_mount_failed: false,
            ..Default::default()
        };

        // SAFETY: conf and both strings outlive the call; IDF copies them
        esp!(unsafe { esp_vfs_spiffs_register(&conf) })?;

        info!(
            "💾 Config partition {} mounted at {}",
            PARTITION_LABEL.to_string_lossy(),
            MOUNT_POINT.to_string_lossy()
        );
        Ok(())
    }
}
