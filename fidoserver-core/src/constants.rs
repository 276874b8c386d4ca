pub const AUTHENTICATOR_DATA_MIN_LEN: usize = 37;

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

pub const CLIENT_DATA_TYPE_CREATE: &str = "webauthn.create";
pub const CLIENT_DATA_TYPE_GET: &str = "webauthn.get";
pub const CLIENT_DATA_TYPE_U2F_GET: &str = "navigator.id.getAssertion";

pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";

pub const DEFAULT_TRANSPORT_HINT: &str = "BLE_USB_NFC";
pub const FIDO_PROTOCOL_VERSION: &str = "FIDO2_0";

pub const SAFETYNET_HOSTNAME: &str = "attest.android.com";
