pub const APP_ID_BASE: &str = "app.vaultsync";

pub const DBUS_NAME_SYNC: &str = "app.vaultsync.Sync1";
pub const DBUS_INTERFACE_SYNC: &str = "app.vaultsync.Sync1";
pub const DBUS_OBJECT_PATH_SYNC: &str = "/app/vaultsync/Sync1";

pub const DBUS_ERROR_NOT_READY: &str = "app.vaultsync.Sync1.Error.NotReady";
pub const DBUS_ERROR_UNAUTHENTICATED: &str = "app.vaultsync.Sync1.Error.Unauthenticated";
pub const DBUS_ERROR_INVALID_PATH: &str = "app.vaultsync.Sync1.Error.InvalidPath";
pub const DBUS_ERROR_FAILED: &str = "app.vaultsync.Sync1.Error.Failed";

pub const KEYRING_SERVICE: &str = APP_ID_BASE;
pub const KEYRING_ACCOUNT: &str = "access_token";
