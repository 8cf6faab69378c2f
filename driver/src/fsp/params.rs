//! Volume Parameters and Snapshots
//!
//! [`VolumeParams`] is the mount configuration a volume device is created
//! with. It is supplied by the mount request and only read afterwards.
//!
//! [`FileInfo`] and [`VolumeInfo`] are the cached snapshots exchanged with
//! callers. Both are `Copy` and always copied in and out of their slots
//! under the slot's lock.

/// IRP timeout bounds, in milliseconds
pub const FSP_FSCTL_IRP_TIMEOUT_MINIMUM: u32 = 60000;
pub const FSP_FSCTL_IRP_TIMEOUT_DEFAULT: u32 = 300000;
pub const FSP_FSCTL_IRP_TIMEOUT_MAXIMUM: u32 = 600000;

/// IRP queue capacity bounds
pub const FSP_FSCTL_IRP_CAPACITY_MINIMUM: u32 = 100;
pub const FSP_FSCTL_IRP_CAPACITY_DEFAULT: u32 = 1000;
pub const FSP_FSCTL_IRP_CAPACITY_MAXIMUM: u32 = 1000;

/// Default file info cache timeout, in milliseconds
pub const FSP_FSCTL_FILE_INFO_TIMEOUT_DEFAULT: u32 = 1000;

/// Security descriptor cache sizing
pub const FSP_FSVOL_SECURITY_CACHE_CAPACITY: u32 = 100;
pub const FSP_FSVOL_SECURITY_CACHE_ITEM_SIZE_MAX: u32 = 4096;

/// Directory info cache sizing
pub const FSP_FSVOL_DIR_INFO_CACHE_CAPACITY: u32 = 100;
pub const FSP_FSVOL_DIR_INFO_CACHE_ITEM_SIZE_MAX: u32 = 16384;

/// Maximum volume label length, in UTF-16 code units
pub const FSP_FSCTL_VOLUME_LABEL_SIZE: usize = 32;

/// File attributes
pub mod file_attributes {
    pub const FILE_ATTRIBUTE_READONLY: u32 = 0x00000001;
    pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x00000002;
    pub const FILE_ATTRIBUTE_SYSTEM: u32 = 0x00000004;
    pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x00000010;
    pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x00000020;
    pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x00000080;
    pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x00000400;
}

/// Mount configuration of a volume
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeParams {
    pub sector_size: u16,
    pub sectors_per_allocation_unit: u16,
    pub volume_creation_time: u64,
    pub volume_serial_number: u32,
    /// Time a request may wait for the user-mode file system, in ms
    pub irp_timeout: u32,
    /// Maximum number of pending requests
    pub irp_capacity: u32,
    /// Lifetime of cached file and volume info, in ms
    pub file_info_timeout: u32,
    pub case_sensitive_search: bool,
    pub case_preserved_names: bool,
}

impl VolumeParams {
    /// Clamp IRP timeout and capacity into their allowed ranges
    pub fn normalize(&mut self) {
        self.irp_timeout = self
            .irp_timeout
            .clamp(FSP_FSCTL_IRP_TIMEOUT_MINIMUM, FSP_FSCTL_IRP_TIMEOUT_MAXIMUM);
        self.irp_capacity = self
            .irp_capacity
            .clamp(FSP_FSCTL_IRP_CAPACITY_MINIMUM, FSP_FSCTL_IRP_CAPACITY_MAXIMUM);
    }

    /// Normalized copy
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

impl Default for VolumeParams {
    fn default() -> Self {
        Self {
            sector_size: 512,
            sectors_per_allocation_unit: 1,
            volume_creation_time: 0,
            volume_serial_number: 0,
            irp_timeout: FSP_FSCTL_IRP_TIMEOUT_DEFAULT,
            irp_capacity: FSP_FSCTL_IRP_CAPACITY_DEFAULT,
            file_info_timeout: FSP_FSCTL_FILE_INFO_TIMEOUT_DEFAULT,
            case_sensitive_search: false,
            case_preserved_names: true,
        }
    }
}

/// Volume info snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    /// Label length in UTF-16 code units
    pub volume_label_length: u16,
    pub volume_label: [u16; FSP_FSCTL_VOLUME_LABEL_SIZE],
}

impl VolumeInfo {
    /// Snapshot with a label, truncated to the label capacity
    pub fn new(total_size: u64, free_size: u64, label: &str) -> Self {
        let mut info = Self {
            total_size,
            free_size,
            ..Self::default()
        };

        for (slot, unit) in info.volume_label.iter_mut().zip(label.encode_utf16()) {
            *slot = unit;
            info.volume_label_length += 1;
        }

        info
    }

    /// Label as UTF-16 code units
    pub fn label(&self) -> &[u16] {
        let length = (self.volume_label_length as usize).min(FSP_FSCTL_VOLUME_LABEL_SIZE);
        &self.volume_label[..length]
    }
}

impl Default for VolumeInfo {
    fn default() -> Self {
        Self {
            total_size: 0,
            free_size: 0,
            volume_label_length: 0,
            volume_label: [0; FSP_FSCTL_VOLUME_LABEL_SIZE],
        }
    }
}

/// File info snapshot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_attributes: u32,
    pub reparse_tag: u32,
    pub allocation_size: u64,
    pub file_size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
}
