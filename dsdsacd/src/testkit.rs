//! Test support: an in-memory disc-image builder and a scripted drive
//! that plays the drive side of the key exchange. Compiled for this
//! crate's own tests and, behind the `testkit` feature, for dependent
//! crates' integration tests.

use aes::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};

use dsdmeta::AlbumInfo;

use crate::crypto::{
    pkcs1_pad_type2, pkcs1_unpad_type2, rsa_private_op, rsa_public_op, sha1_digest, RSA_BLOCK,
};
use crate::keys::{DISC_IV, HOST_MODULUS, SESSION_IV};
use crate::sector::SECTOR_SIZE;
use crate::toc::MASTER_TOC_LSN;
use crate::transport::{DriveTransport, SacCommand, SacResponse};
use crate::{keys, SacdError};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

pub const CA_ROOT_PRIVATE_EXPONENT: [u8; 128] = [
    0xb7, 0xe9, 0x6d, 0x74, 0xc1, 0x36, 0x42, 0x33, 0x4e, 0x1a, 0x1c, 0x19, 0x65, 0x6c, 0x4c, 0x9f,
    0xdb, 0x04, 0x44, 0xe3, 0xb5, 0x56, 0x5d, 0x60, 0x58, 0xbd, 0x1f, 0x08, 0x78, 0xfd, 0xd7, 0xaf,
    0x1b, 0x85, 0x77, 0x94, 0x0c, 0xb0, 0x5c, 0xe2, 0x07, 0x42, 0x71, 0x3e, 0x29, 0x3d, 0x7e, 0x46,
    0x59, 0x0d, 0x4a, 0x95, 0xac, 0x14, 0x9e, 0x7c, 0xd9, 0xf4, 0x8d, 0x33, 0xc9, 0x24, 0x1c, 0xbb,
    0x42, 0xfc, 0x1d, 0x09, 0xee, 0x88, 0x22, 0xdc, 0xd3, 0x91, 0x3a, 0x11, 0x0d, 0xe3, 0x4d, 0x55,
    0x82, 0xb8, 0x9e, 0x46, 0xb4, 0x4a, 0x82, 0x8f, 0x16, 0x1b, 0x93, 0x69, 0xcf, 0x4f, 0xcd, 0xe4,
    0x7a, 0xea, 0x25, 0x11, 0xd3, 0x2c, 0x62, 0xb5, 0xd4, 0xc1, 0x6a, 0x20, 0x18, 0x4c, 0xd7, 0xeb,
    0x4e, 0xbd, 0x1d, 0xa9, 0x0a, 0x07, 0x46, 0x9c, 0x83, 0x04, 0x5f, 0xc0, 0xa5, 0xd3, 0xa3, 0x81,
];

pub const DRIVE_MODULUS: [u8; 128] = [
    0xab, 0x49, 0x3d, 0x03, 0xb4, 0xea, 0x6d, 0xb2, 0x69, 0xef, 0x06, 0xc7, 0x41, 0xd9, 0x46, 0x43,
    0x5a, 0xcd, 0xd3, 0x6e, 0xf2, 0xe5, 0x02, 0x10, 0x4d, 0x66, 0x57, 0x77, 0xcb, 0x93, 0xba, 0x62,
    0xb5, 0x5f, 0x91, 0xa8, 0x3e, 0xf5, 0x02, 0x2e, 0x8e, 0xdf, 0xcb, 0x62, 0x21, 0x0e, 0x00, 0x18,
    0xe7, 0xfe, 0xeb, 0xaf, 0xf0, 0xad, 0xfe, 0x54, 0x98, 0xbd, 0x7c, 0xb1, 0xed, 0x3f, 0xeb, 0x84,
    0x60, 0x2a, 0x1d, 0x72, 0xb7, 0x1e, 0x99, 0x07, 0x7d, 0x49, 0x32, 0x48, 0x64, 0x3b, 0xe4, 0xd4,
    0xca, 0xcf, 0x88, 0xa7, 0x45, 0xb7, 0x3b, 0xbe, 0xd3, 0x78, 0x3f, 0x79, 0xa4, 0x94, 0x15, 0xb8,
    0x2c, 0xce, 0x5f, 0xce, 0x56, 0x4a, 0xd7, 0x1c, 0xa0, 0x08, 0x03, 0x6c, 0xdf, 0xd9, 0xda, 0xf4,
    0xb7, 0xd6, 0xda, 0x47, 0x73, 0xf1, 0x34, 0x12, 0x0d, 0x03, 0xa8, 0x91, 0xb0, 0x1c, 0xe3, 0x29,
];

pub const DRIVE_PRIVATE_EXPONENT: [u8; 128] = [
    0x9d, 0xbe, 0xc1, 0x56, 0x5c, 0x93, 0x59, 0x9b, 0x6a, 0x3c, 0x1b, 0xfd, 0xfe, 0x02, 0xdf, 0xd6,
    0xc0, 0x15, 0xb6, 0x97, 0x03, 0x53, 0x2c, 0xe7, 0x5e, 0xa0, 0xd6, 0x05, 0x19, 0x93, 0x5f, 0x9f,
    0xf0, 0x71, 0xa7, 0x6f, 0x4f, 0x2b, 0xcd, 0x6a, 0x9b, 0x62, 0x37, 0xa8, 0x93, 0xd0, 0x94, 0xfe,
    0x5b, 0x0a, 0x46, 0x7c, 0xae, 0x27, 0x4f, 0x87, 0x11, 0x73, 0xd1, 0x16, 0xfb, 0xec, 0x56, 0x34,
    0xfc, 0x4c, 0x1f, 0x21, 0x54, 0x0c, 0xd7, 0xef, 0xb7, 0x51, 0x9a, 0x28, 0x60, 0x87, 0xb8, 0x44,
    0xf8, 0x8e, 0x96, 0x28, 0xfc, 0xe4, 0x75, 0xc9, 0x0a, 0xcf, 0x8c, 0x91, 0xa1, 0x52, 0xe0, 0x25,
    0xfe, 0xd7, 0x59, 0xc8, 0x1a, 0xc6, 0x6d, 0xff, 0x68, 0xbb, 0xdd, 0xf4, 0xe3, 0x61, 0xc0, 0x44,
    0x24, 0x1c, 0xba, 0x8f, 0x97, 0xf8, 0xfa, 0xeb, 0x99, 0x19, 0xfe, 0x6c, 0xd4, 0x77, 0xf1, 0x41,
];

/// AES-128-CBC encryption for fixtures, no padding.
pub fn aes128_cbc_encrypt_in_place(key: &[u8; 16], iv: &[u8; 16], data: &mut [u8]) {
    assert_eq!(data.len() % 16, 0, "CBC fixture data must be block-aligned");
    let encryptor = Aes128CbcEnc::new(key.into(), iv.into());
    let len = data.len();
    encryptor
        .encrypt_padded_mut::<NoPadding>(data, len)
        .expect("in-place CBC encryption");
}

/// Failure injections for exercising the host's tamper handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Tamper {
    #[default]
    None,
    /// Return a non-zero status from the named exchange step.
    BadStatus(SacCommand),
    /// Corrupt the certificate format marker.
    BadCertMarker,
    /// Corrupt the CA signature over the certificate body.
    BadCaSignature,
    /// Echo the wrong host random in the session blob.
    WrongHostRandom,
    /// Report no disc present.
    NoDisc,
}

/// One track of a fixture disc.
struct FixtureTrack {
    title: Option<String>,
    performer: Option<String>,
    songwriter: Option<String>,
    isrc: Option<String>,
    duration_frames: u64,
}

/// Builds a plain (unencrypted) disc image in memory.
pub struct ImageBuilder {
    sample_rate: u32,
    channel_count: u32,
    album: AlbumInfo,
    tracks: Vec<FixtureTrack>,
    audio: Option<Vec<u8>>,
}

impl ImageBuilder {
    pub fn new(sample_rate: u32, channel_count: u32) -> Self {
        ImageBuilder {
            sample_rate,
            channel_count,
            album: AlbumInfo::default(),
            tracks: Vec::new(),
            audio: None,
        }
    }

    pub fn album(mut self, album: AlbumInfo) -> Self {
        self.album = album;
        self
    }

    pub fn track(
        mut self,
        title: &str,
        performer: &str,
        isrc: Option<&str>,
        duration_frames: u64,
    ) -> Self {
        self.tracks.push(FixtureTrack {
            title: Some(title.to_string()),
            performer: Some(performer.to_string()),
            songwriter: None,
            isrc: isrc.map(str::to_string),
            duration_frames,
        });
        self
    }

    /// Override the area audio stream; defaults to a deterministic
    /// pattern covering every track.
    pub fn audio(mut self, audio: Vec<u8>) -> Self {
        self.audio = Some(audio);
        self
    }

    fn frame_bytes(&self) -> u64 {
        588 * (self.sample_rate / 44_100) as u64 / 8 * self.channel_count as u64
    }

    /// Lay out the image: master TOC at its fixed sector, the stereo area
    /// TOC right after it, audio from the next free sector.
    pub fn build(self) -> Vec<u8> {
        let track_count = self.tracks.len();
        let area_toc_bytes = 32 + 128 * track_count;
        let area_toc_sectors = area_toc_bytes.div_ceil(SECTOR_SIZE).max(1) as u16;
        let area_toc_lsn = MASTER_TOC_LSN + 2;
        let audio_lsn = area_toc_lsn + area_toc_sectors as u32;

        let total_frames: u64 = self.tracks.iter().map(|t| t.duration_frames).sum();
        let audio_len = (total_frames * self.frame_bytes()) as usize;
        let audio = self.audio.unwrap_or_else(|| {
            (0..audio_len).map(|i| ((i * 31 + 7) % 256) as u8).collect()
        });
        assert_eq!(audio.len(), audio_len, "audio must cover every track");
        let audio_sectors = audio.len().div_ceil(SECTOR_SIZE);

        let total_sectors = audio_lsn as usize + audio_sectors;
        let mut image = vec![0u8; total_sectors * SECTOR_SIZE];

        // Master TOC.
        {
            let sector = &mut image[MASTER_TOC_LSN as usize * SECTOR_SIZE..][..SECTOR_SIZE];
            sector[0..8].copy_from_slice(b"SACDMTOC");
            sector[8..10].copy_from_slice(&0x0102u16.to_be_bytes());
            sector[10..12].copy_from_slice(
                &self.album.disc_total.unwrap_or(1).min(u16::MAX as u32).to_be_bytes()[2..],
            );
            sector[12..14].copy_from_slice(
                &self.album.disc_number.unwrap_or(1).min(u16::MAX as u32).to_be_bytes()[2..],
            );
            sector[14..16]
                .copy_from_slice(&(self.album.year.unwrap_or(0) as u16).to_be_bytes());
            sector[16] = 1;
            sector[17] = 1;
            write_text(&mut sector[20..36], self.album.catalog_number.as_deref());
            write_text(&mut sector[36..52], self.album.genre.as_deref());
            sector[52..56].copy_from_slice(&area_toc_lsn.to_be_bytes());
            sector[56..58].copy_from_slice(&area_toc_sectors.to_be_bytes());
            // No multichannel area on fixture discs.
            write_text(&mut sector[128..192], self.album.title.as_deref());
            write_text(&mut sector[192..256], self.album.artist.as_deref());
            write_text(&mut sector[256..320], self.album.publisher.as_deref());
            write_text(&mut sector[320..384], self.album.copyright.as_deref());
        }

        // Stereo area TOC.
        {
            let area = &mut image[area_toc_lsn as usize * SECTOR_SIZE..]
                [..area_toc_sectors as usize * SECTOR_SIZE];
            area[0..8].copy_from_slice(b"TWOCHTOC");
            area[8..10].copy_from_slice(&0x0102u16.to_be_bytes());
            area[10] = track_count as u8;
            area[11] = self.channel_count as u8;
            area[12..16].copy_from_slice(&self.sample_rate.to_be_bytes());
            area[16..20].copy_from_slice(&audio_lsn.to_be_bytes());

            let mut start_frames = 0u64;
            for (i, track) in self.tracks.iter().enumerate() {
                let record = &mut area[32 + i * 128..][..128];
                record[0..8].copy_from_slice(&start_frames.to_be_bytes());
                record[8..16].copy_from_slice(&track.duration_frames.to_be_bytes());
                if let Some(isrc) = &track.isrc {
                    record[16..28].copy_from_slice(isrc.as_bytes());
                }
                write_text(&mut record[28..68], track.title.as_deref());
                write_text(&mut record[68..98], track.performer.as_deref());
                write_text(&mut record[98..128], track.songwriter.as_deref());
                start_frames += track.duration_frames;
            }
        }

        image[audio_lsn as usize * SECTOR_SIZE..][..audio.len()].copy_from_slice(&audio);
        image
    }
}

fn write_text(slot: &mut [u8], text: Option<&str>) {
    if let Some(text) = text {
        let bytes = text.as_bytes();
        let len = bytes.len().min(slot.len());
        slot[..len].copy_from_slice(&bytes[..len]);
    }
}

/// A drive emulation serving an encrypted image behind the key exchange.
pub struct ScriptedDrive {
    image: Vec<u8>,
    disc_key: [u8; 16],
    tamper: Tamper,

    drive_response: [u8; 16],
    drive_cert_id: [u8; 8],
    drive_session_random: [u8; 16],
    host_random: [u8; 16],
    host_session_random: [u8; 16],
    pub bd_keys_seen: Vec<[u8; 16]>,
    pub commands_seen: Vec<SacCommand>,
}

impl ScriptedDrive {
    /// Encrypt a plain image sector-by-sector under `disc_key`.
    pub fn new(plain_image: &[u8], disc_key: [u8; 16]) -> Self {
        assert_eq!(plain_image.len() % SECTOR_SIZE, 0);
        let mut image = plain_image.to_vec();
        for sector in image.chunks_mut(SECTOR_SIZE) {
            aes128_cbc_encrypt_in_place(&disc_key, &DISC_IV, sector);
        }
        ScriptedDrive {
            image,
            disc_key,
            tamper: Tamper::None,
            drive_response: [0xD7; 16],
            drive_cert_id: [0xC4; 8],
            drive_session_random: [0x5A; 16],
            host_random: [0; 16],
            host_session_random: [0; 16],
            bd_keys_seen: Vec::new(),
            commands_seen: Vec::new(),
        }
    }

    pub fn with_tamper(mut self, tamper: Tamper) -> Self {
        self.tamper = tamper;
        self
    }

    fn respond(&self, command: SacCommand, data: Vec<u8>) -> SacResponse {
        let status = if self.tamper == Tamper::BadStatus(command) {
            0x0502
        } else {
            0
        };
        SacResponse { status, data }
    }

    fn certificate(&self) -> Result<Vec<u8>, SacdError> {
        let mut plaintext = [0u8; RSA_BLOCK];
        plaintext[0] = 0x6a;
        plaintext[1..18].fill(0x11);
        plaintext[18..107].copy_from_slice(&DRIVE_MODULUS[..89]);
        plaintext[107..].fill(0x22);

        let mut body = rsa_private_op(&plaintext, &keys::CA_ROOT_MODULUS, &CA_ROOT_PRIVATE_EXPONENT)?;
        if self.tamper == Tamper::BadCaSignature {
            body[64] ^= 0x40;
        }

        let mut data = Vec::with_capacity(197);
        data.extend_from_slice(&self.drive_response);
        data.extend_from_slice(&self.drive_cert_id);
        data.push(if self.tamper == Tamper::BadCertMarker {
            0x94
        } else {
            0x95
        });
        data.extend_from_slice(&body);
        data.extend_from_slice(&DRIVE_MODULUS[89..]);
        data.extend_from_slice(&[0u8; 5]);
        debug_assert_eq!(data.len(), 197);
        Ok(data)
    }

    fn accept_session(&mut self, payload: &[u8]) -> Result<i32, SacdError> {
        if payload.len() != 174 {
            return Ok(0x0501);
        }
        let envelope = rsa_public_op(&payload[..RSA_BLOCK], &HOST_MODULUS)?;
        if envelope[0] != 0x6a || envelope[127] != 0xBC {
            return Ok(0x0503);
        }
        if envelope[1..17] != self.drive_response || envelope[17..25] != self.drive_cert_id {
            return Ok(0x0504);
        }

        let mut encrypted_session = [0u8; RSA_BLOCK];
        encrypted_session[..82].copy_from_slice(&envelope[25..107]);
        encrypted_session[82..].copy_from_slice(&payload[128..174]);

        let digest = sha1_digest(&[
            &self.drive_response,
            &self.drive_cert_id,
            &encrypted_session,
        ]);
        if digest != envelope[107..127] {
            return Ok(0x0505);
        }

        let plain = rsa_private_op(&encrypted_session, &DRIVE_MODULUS, &DRIVE_PRIVATE_EXPONENT)?;
        let message = pkcs1_unpad_type2(&plain)?;
        if message.len() != 20 || message[..4] != keys::HOST_CERT_ID.to_be_bytes() {
            return Ok(0x0506);
        }
        self.host_session_random.copy_from_slice(&message[4..20]);
        Ok(0)
    }

    fn session_blob(&self) -> Result<Vec<u8>, SacdError> {
        let padded = pkcs1_pad_type2(&self.drive_session_random)?;
        let inner = rsa_public_op(&padded, &HOST_MODULUS)?;

        let mut outer = [0u8; RSA_BLOCK];
        outer[0] = 0x6a;
        outer[1..17].copy_from_slice(&self.host_random);
        if self.tamper == Tamper::WrongHostRandom {
            outer[1] ^= 0xFF;
        }
        outer[17..25].fill(0x33);
        outer[25..107].copy_from_slice(&inner[..82]);
        outer[107..].fill(0x44);

        let sealed = rsa_private_op(&outer, &DRIVE_MODULUS, &DRIVE_PRIVATE_EXPONENT)?;
        let mut data = Vec::with_capacity(174);
        data.extend_from_slice(&sealed);
        data.extend_from_slice(&inner[82..]);
        Ok(data)
    }

    fn key_block(&self) -> Vec<u8> {
        let session_key_digest =
            sha1_digest(&[&self.host_session_random, &self.drive_session_random]);
        let mut session_key = [0u8; 16];
        session_key.copy_from_slice(&session_key_digest[..16]);

        let mut block = [0u8; 48];
        block[..0x20].fill(0x77);
        block[0x20..0x30].copy_from_slice(&self.disc_key);
        aes128_cbc_encrypt_in_place(&session_key, &SESSION_IV, &mut block);
        block.to_vec()
    }
}

impl DriveTransport for ScriptedDrive {
    fn check_ready(&mut self) -> Result<(), SacdError> {
        if self.tamper == Tamper::NoDisc {
            return Err(SacdError::NoDisc);
        }
        Ok(())
    }

    fn establish_key(&mut self, _slot: u8, key: &[u8; 16]) -> Result<i32, SacdError> {
        self.bd_keys_seen.push(*key);
        Ok(0)
    }

    fn sac_command(
        &mut self,
        command: SacCommand,
        payload: &[u8],
    ) -> Result<SacResponse, SacdError> {
        self.commands_seen.push(command);
        match command {
            SacCommand::Cmd0 => Ok(self.respond(command, vec![0x01, 0, 0, 0, 0, 0, 0, 0])),
            SacCommand::Cmd2 => {
                if payload.len() != 204 || payload[24] != 0x00 || payload[25] != 0x99 {
                    return Ok(SacResponse {
                        status: 0x0500,
                        data: Vec::new(),
                    });
                }
                self.host_random.copy_from_slice(&payload[..16]);
                Ok(self.respond(command, Vec::new()))
            }
            SacCommand::Cmd3 => {
                let data = self.certificate()?;
                Ok(self.respond(command, data))
            }
            SacCommand::Cmd4 => {
                let status = self.accept_session(payload)?;
                if status != 0 {
                    return Ok(SacResponse {
                        status,
                        data: Vec::new(),
                    });
                }
                Ok(self.respond(command, Vec::new()))
            }
            SacCommand::Cmd5 => {
                let data = self.session_blob()?;
                Ok(self.respond(command, data))
            }
            SacCommand::Cmd6 => {
                let data = self.key_block();
                Ok(self.respond(command, data))
            }
        }
    }

    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8]) -> Result<(), SacdError> {
        let start = lsn as usize * SECTOR_SIZE;
        if start + buf.len() > self.image.len() {
            return Err(SacdError::UnexpectedEof);
        }
        buf.copy_from_slice(&self.image[start..start + buf.len()]);
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        (self.image.len() / SECTOR_SIZE) as u64
    }
}

/// A sector source over in-memory image bytes, for tests that do not
/// need a file on disk.
pub struct MemorySectorSource {
    image: Vec<u8>,
}

impl MemorySectorSource {
    pub fn new(image: Vec<u8>) -> Self {
        assert_eq!(image.len() % SECTOR_SIZE, 0);
        MemorySectorSource { image }
    }
}

impl crate::sector::SectorSource for MemorySectorSource {
    fn read_sectors(&mut self, lsn: u32, buf: &mut [u8]) -> Result<(), SacdError> {
        let start = lsn as usize * SECTOR_SIZE;
        if start + buf.len() > self.image.len() {
            return Err(SacdError::UnexpectedEof);
        }
        buf.copy_from_slice(&self.image[start..start + buf.len()]);
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        (self.image.len() / SECTOR_SIZE) as u64
    }
}
