use base64::{engine::general_purpose, Engine as _};
use data_encoding::BASE32_NOPAD;

pub fn truncated_base64<T: AsRef<[u8]>>(data: T) -> String {
    let encoded = general_purpose::STANDARD_NO_PAD.encode(data);
    encoded.chars().take(10).collect()
}

pub fn truncated_base32<T: AsRef<[u8]>>(data: T) -> String {
    let encoded = BASE32_NOPAD.encode(data.as_ref());
    encoded.chars().take(8).collect()
}
