/// mDNS service type advertised by beoremote products
pub const BEOREMOTE_SERVICE_TYPE: &str = "_beoremote._tcp.local.";

/// TXT record keys read from beoremote advertisements
pub const TXT_JID: &str = "jid";
pub const TXT_NAME: &str = "name";

/// Port the beoremote REST API listens on
pub const DEVICE_PORT: u16 = 8080;

/// System query: every product the device knows about
pub const SYSTEM_PRODUCTS_PATH: &str = "/BeoZone/System/Products";

/// Long-lived notification feed
pub const NOTIFICATIONS_PATH: &str = "/BeoNotify/Notifications";
