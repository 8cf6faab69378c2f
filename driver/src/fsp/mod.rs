//! File System Proxy (fsp)
//!
//! The proxy's own state, built on the NT layers below it:
//!
//! - **device**: device extensions, creation, reference counting, deletion
//! - **fsvol**: volume state, context tables, expiration timer
//! - **file**: file nodes, open/close admission, file descriptors
//! - **params**: mount configuration and cached info snapshots
//! - **services**: collaborators owned by a volume (IRP queue, caches,
//!   change notification)

pub mod device;
pub mod file;
pub mod fsvol;
pub mod params;
pub mod services;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{
    fsp_device_copy_list, fsp_device_create, fsp_device_create_secure, fsp_device_delete, fsp_device_delete_all,
    fsp_device_dereference, fsp_device_initialize, fsp_device_reference, fsp_fsvol_device_extension,
    fsp_fsvol_device_set_params, FspDeviceExtension, FspDeviceExtensionKind,
};
pub use file::{
    fsp_file_desc_create, fsp_file_desc_delete, fsp_file_node_close, fsp_file_node_create, fsp_file_node_open,
    fsp_file_object_set_sizes, FileDesc, FileNode, FileNodeAcquire,
};
pub use fsvol::{FsvolContextTable, FsvolDeviceExtension, FsvolDeviceParams, FsvolInitDone};
pub use params::{FileInfo, VolumeInfo, VolumeParams};
pub use services::{FsvolServices, IrpQueue, MetaCache, MetaCacheKind, NotifySync};
