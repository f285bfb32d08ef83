pub mod daemon;
pub mod dbus_api;
pub mod folder_picker;
pub mod settings;
pub mod storage;
pub mod sync;
