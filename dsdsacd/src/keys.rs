//! Embedded key material for the SAC exchange.
//!
//! These constants stand in for the vendor-issued host credentials: the
//! certificate-authority root modulus used to verify drive certificates,
//! the host RSA-1024 keypair, and the two BD-authentication keys. The
//! public-key blob sent in the second exchange step is assembled from the
//! host modulus at run time.

/// Host certificate id sent in the second exchange step.
pub const HOST_CERT_ID: u32 = 0x0000_0001;

/// The two embedded keys the BD-authentication commands carry.
pub const BD_AUTH_KEYS: [[u8; 16]; 2] = [
    [
        0x1a, 0x86, 0x30, 0x57, 0xc2, 0x7e, 0x41, 0x9d, 0x65, 0x78, 0x83, 0x0f, 0xba, 0x21, 0x94,
        0x4e,
    ],
    [
        0x9c, 0x3d, 0xe1, 0x48, 0x5b, 0xa4, 0x10, 0x7f, 0x26, 0xc9, 0xd5, 0x02, 0x6b, 0xe8, 0x37,
        0x50,
    ],
];

/// IV for the session-key decryption step: `{0x00000010, 0, 0, 0}` packed
/// big-endian.
pub const SESSION_IV: [u8; 16] = [
    0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

/// Fixed IV for per-disc sector decryption.
pub const DISC_IV: [u8; 16] = [
    0x3c, 0x5f, 0x91, 0x28, 0x44, 0xe0, 0x7a, 0x1d, 0x96, 0xb2, 0x0d, 0x68, 0xc3, 0x55, 0xae,
    0x17,
];

pub const CA_ROOT_MODULUS: [u8; 128] = [
    0xdd, 0x85, 0xb6, 0xaf, 0xf1, 0x4c, 0x00, 0x88, 0xc9, 0x23, 0x01, 0x9b, 0x56, 0xaf, 0x0e, 0x1b,
    0x3b, 0x1f, 0xb3, 0xb4, 0x0d, 0x7c, 0x23, 0xfa, 0x58, 0x59, 0x2b, 0x1d, 0x68, 0x0e, 0xc2, 0x13,
    0xb8, 0x3d, 0xe5, 0x1c, 0xfe, 0x5a, 0xed, 0x59, 0xe5, 0x0d, 0x47, 0xa9, 0x06, 0x7b, 0x5c, 0xff,
    0xa6, 0x0e, 0xa3, 0xea, 0xfd, 0x92, 0xd6, 0x3c, 0x5b, 0xa9, 0x0c, 0x1c, 0xbf, 0xd0, 0x4c, 0xca,
    0x4b, 0xc4, 0x17, 0xf7, 0xb0, 0xbd, 0x9e, 0xe1, 0x77, 0x3e, 0xb9, 0xe9, 0xca, 0x39, 0x71, 0x9e,
    0x95, 0x89, 0x52, 0x86, 0x5a, 0xe2, 0x40, 0x53, 0x24, 0x1c, 0x13, 0xfa, 0x65, 0x15, 0xb7, 0x36,
    0x62, 0xc1, 0x0f, 0xed, 0x51, 0x42, 0x14, 0xd3, 0xd0, 0x8d, 0x9f, 0xdd, 0x6e, 0x39, 0xfe, 0x16,
    0x1b, 0x34, 0x9c, 0xdd, 0x36, 0xcb, 0xbd, 0x4d, 0xcd, 0x2e, 0x6f, 0xed, 0x23, 0xd0, 0x08, 0xa1,
];

pub const HOST_MODULUS: [u8; 128] = [
    0x80, 0xf5, 0x87, 0x1c, 0x33, 0xa8, 0xed, 0x8c, 0x61, 0x24, 0x44, 0xaa, 0x14, 0xf4, 0xa9, 0xe2,
    0x50, 0x40, 0x28, 0x09, 0x5a, 0x1f, 0xd8, 0x61, 0xe1, 0x6e, 0xb8, 0xb3, 0xe0, 0xb1, 0xf5, 0x0c,
    0xac, 0x02, 0x58, 0x00, 0xa3, 0xf2, 0x20, 0x20, 0x19, 0x27, 0xd2, 0x8b, 0x09, 0xbd, 0x6d, 0xdf,
    0x3f, 0x3b, 0x4a, 0x75, 0x73, 0x84, 0xc9, 0x68, 0xbf, 0x18, 0x42, 0xf0, 0xbb, 0x93, 0x2c, 0x80,
    0x64, 0x79, 0x2c, 0x47, 0x06, 0x9f, 0x84, 0x87, 0x79, 0xec, 0xb9, 0xed, 0xf4, 0x13, 0xf6, 0x91,
    0xf2, 0x0f, 0x40, 0x33, 0x7e, 0x12, 0xaf, 0xec, 0x67, 0xe2, 0x22, 0xb3, 0x79, 0x92, 0x24, 0x15,
    0xe9, 0xcf, 0xd1, 0x9f, 0x39, 0xc2, 0x6f, 0x88, 0x0e, 0x25, 0x20, 0xf2, 0x18, 0x85, 0x13, 0x0a,
    0x3d, 0x44, 0xac, 0x99, 0x66, 0xd3, 0x4c, 0x95, 0x4a, 0x74, 0xf8, 0xa3, 0xca, 0xe3, 0x82, 0x0f,
];

pub const HOST_PRIVATE_EXPONENT: [u8; 128] = [
    0x7e, 0x28, 0xb5, 0x1e, 0xff, 0xe2, 0xf9, 0x51, 0xe6, 0x0e, 0xc7, 0x25, 0xe5, 0x0e, 0x5d, 0xcc,
    0x4b, 0x5a, 0x18, 0x50, 0xdd, 0xdc, 0x5d, 0xa1, 0x94, 0x1a, 0xef, 0x92, 0xf9, 0xf4, 0xde, 0x98,
    0xa1, 0x06, 0x41, 0xf5, 0x8e, 0x6d, 0xe6, 0xc3, 0xc0, 0x18, 0x57, 0x3f, 0x32, 0x2e, 0x21, 0x78,
    0xcf, 0xb1, 0x3f, 0x6c, 0x9b, 0xb0, 0x82, 0x21, 0x79, 0x21, 0x51, 0x0b, 0x95, 0x55, 0xab, 0xa8,
    0x23, 0xf5, 0x35, 0xef, 0xdd, 0x9e, 0xe6, 0x03, 0xfa, 0x65, 0x9a, 0x65, 0xf4, 0x7a, 0xb5, 0x4a,
    0x1f, 0x76, 0x5f, 0x7c, 0x0b, 0x2c, 0x36, 0xba, 0x9b, 0x85, 0xce, 0x33, 0xf9, 0x12, 0x74, 0x6a,
    0x1f, 0x3b, 0x01, 0x0c, 0x5a, 0x99, 0xf8, 0xba, 0xfb, 0xa9, 0xdc, 0x42, 0x10, 0xcc, 0xe9, 0x1d,
    0xf5, 0xbf, 0x4d, 0x93, 0xd3, 0xf0, 0xfb, 0x7b, 0x5f, 0x1e, 0x0b, 0x70, 0xdb, 0xaa, 0xab, 0x61,
];

/// Length of the public-key blob carried by the second exchange step.
pub const HOST_PUBLIC_BLOB_LEN: usize = 175;

/// Assemble the 175-byte host public-key blob: a two-byte marker, the
/// public exponent, the modulus, and reserved padding.
pub fn host_public_key_blob() -> [u8; HOST_PUBLIC_BLOB_LEN] {
    let mut blob = [0u8; HOST_PUBLIC_BLOB_LEN];
    blob[0] = 0x00;
    blob[1] = 0x01;
    blob[2..6].copy_from_slice(&65_537u32.to_be_bytes());
    blob[6..134].copy_from_slice(&HOST_MODULUS);
    blob
}
