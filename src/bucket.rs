use sha1::{Digest, Sha1};

/// Number of rollout buckets; bucket values are percentages.
pub const BUCKET_COUNT: u32 = 100;

// 8 hex chars == the first 4 bytes of the digest
const BUCKET_HEX_PREFIX: usize = 8;

/// Assigns `subject_id` a stable bucket in `[0, 100)` for the flag `flag_key`.
///
/// The bucket is derived from the SHA-1 digest of `"{flag_key}:{subject_id}"`: the first four
/// bytes are read as a big-endian unsigned integer and reduced modulo 100. The result depends on
/// nothing but its inputs, so it is stable across restarts and across implementations that
/// follow the same recipe. Including the flag key means the same subject lands in unrelated
/// buckets for different flags.
///
/// This is a distribution function, not a security primitive.
pub fn bucket(flag_key: &str, subject_id: &str) -> u8 {
    let mut hash = Sha1::new();
    hash.update(flag_key.as_bytes());
    hash.update(b":");
    hash.update(subject_id.as_bytes());

    let digest = hash.finalize();
    let hexhash = base16ct::lower::encode_string(&digest);

    // a SHA-1 digest always encodes to 40 lowercase hex chars, so this cannot fail
    let numhash = u32::from_str_radix(&hexhash[..BUCKET_HEX_PREFIX], 16).unwrap_or_default();

    (numhash % BUCKET_COUNT) as u8
}
