//! BD authentication and the six-step SAC key exchange.
//!
//! The exchange is strictly ordered. Every command status is checked, the
//! two certificate markers (`0x95` in the drive certificate, `0x6a` in
//! each recovered RSA plaintext) are treated as tamper evidence, and all
//! intermediates are zeroised when the session ends.

use rand::RngCore;
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{
    aes128_cbc_decrypt_in_place, pkcs1_pad_type2, pkcs1_unpad_type2, rsa_private_op,
    rsa_public_op, sha1_digest, RSA_BLOCK,
};
use crate::keys;
use crate::transport::{DriveTransport, SacCommand};
use crate::SacdError;

/// The per-disc AES key recovered by the exchange. Zeroised on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DiscKey(pub(crate) [u8; 16]);

impl DiscKey {
    pub(crate) fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Debug for DiscKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of logs.
        f.write_str("DiscKey(..)")
    }
}

/// State accumulated across the exchange steps. Zeroised on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SacSession {
    host_random: [u8; 16],
    host_session_random: [u8; 16],
    drive_response: [u8; 16],
    drive_cert_id: [u8; 8],
    drive_modulus: [u8; RSA_BLOCK],
    session_key: [u8; 16],
}

impl SacSession {
    fn new() -> Self {
        SacSession {
            host_random: [0; 16],
            host_session_random: [0; 16],
            drive_response: [0; 16],
            drive_cert_id: [0; 8],
            drive_modulus: [0; RSA_BLOCK],
            session_key: [0; 16],
        }
    }

    /// Run BD authentication followed by the full SAC exchange and return
    /// the per-disc key.
    pub fn authenticate<T: DriveTransport>(transport: &mut T) -> Result<DiscKey, SacdError> {
        transport.check_ready()?;

        for (slot, key) in keys::BD_AUTH_KEYS.iter().enumerate() {
            let status = transport.establish_key(slot as u8, key)?;
            if status != 0 {
                return Err(SacdError::AuthFailed("drive rejected an embedded key"));
            }
        }
        debug!("BD authentication established");

        let mut session = SacSession::new();
        session.step0(transport)?;
        session.step2(transport)?;
        session.step3(transport)?;
        session.step4(transport)?;
        session.step5(transport)?;
        let disc_key = session.step6(transport)?;
        debug!("SAC exchange complete");
        Ok(disc_key)
    }

    fn command<T: DriveTransport>(
        transport: &mut T,
        command: SacCommand,
        payload: &[u8],
        expect_len: usize,
    ) -> Result<Vec<u8>, SacdError> {
        let response = transport.sac_command(command, payload)?;
        if response.status != 0 {
            return Err(SacdError::SacFailed("drive returned a non-zero status"));
        }
        if response.data.len() < expect_len {
            return Err(SacdError::SacFailed("short command response"));
        }
        trace!(?command, len = response.data.len(), "SAC command round-trip");
        Ok(response.data)
    }

    fn step0<T: DriveTransport>(&mut self, transport: &mut T) -> Result<(), SacdError> {
        let data = Self::command(transport, SacCommand::Cmd0, &[], 8)?;
        trace!(format_byte = data[0], "drive format descriptor");
        Ok(())
    }

    fn step2<T: DriveTransport>(&mut self, transport: &mut T) -> Result<(), SacdError> {
        rand::rng().fill_bytes(&mut self.host_random);

        let mut payload = Vec::with_capacity(204);
        payload.extend_from_slice(&self.host_random);
        payload.extend_from_slice(&[0u8; 4]);
        payload.extend_from_slice(&keys::HOST_CERT_ID.to_be_bytes());
        payload.extend_from_slice(&[0x00, 0x99]);
        payload.extend_from_slice(&keys::host_public_key_blob());
        debug_assert_eq!(payload.len(), 201);
        // Transport padding to a 4-byte boundary.
        while payload.len() % 4 != 0 {
            payload.push(0);
        }

        Self::command(transport, SacCommand::Cmd2, &payload, 0)?;
        Ok(())
    }

    fn step3<T: DriveTransport>(&mut self, transport: &mut T) -> Result<(), SacdError> {
        let data = Self::command(transport, SacCommand::Cmd3, &[], 197)?;

        self.drive_response.copy_from_slice(&data[0..16]);
        self.drive_cert_id.copy_from_slice(&data[16..24]);
        if data[24] != 0x95 {
            return Err(SacdError::SacFailed("bad certificate format marker"));
        }

        let body = &data[25..25 + RSA_BLOCK];
        let tail = &data[153..192];
        let plaintext = rsa_public_op(body, &keys::CA_ROOT_MODULUS)?;
        if plaintext[0] != 0x6a {
            return Err(SacdError::SacFailed("certificate body failed verification"));
        }

        // Drive public key: 89 bytes from the certificate plaintext, the
        // remaining 39 from the certificate tail.
        self.drive_modulus[..89].copy_from_slice(&plaintext[18..107]);
        self.drive_modulus[89..].copy_from_slice(tail);
        Ok(())
    }

    fn step4<T: DriveTransport>(&mut self, transport: &mut T) -> Result<(), SacdError> {
        rand::rng().fill_bytes(&mut self.host_session_random);

        let mut message = Vec::with_capacity(20);
        message.extend_from_slice(&keys::HOST_CERT_ID.to_be_bytes());
        message.extend_from_slice(&self.host_session_random);
        let padded = pkcs1_pad_type2(&message)?;
        let encrypted_session = rsa_public_op(&padded, &self.drive_modulus)?;

        let digest = sha1_digest(&[
            &self.drive_response,
            &self.drive_cert_id,
            &encrypted_session,
        ]);

        // ISO 9796-2-style signing envelope.
        let mut envelope = [0u8; RSA_BLOCK];
        envelope[0] = 0x6a;
        envelope[1..17].copy_from_slice(&self.drive_response);
        envelope[17..25].copy_from_slice(&self.drive_cert_id);
        envelope[25..107].copy_from_slice(&encrypted_session[0..82]);
        envelope[107..127].copy_from_slice(&digest);
        envelope[127] = 0xBC;

        let signature =
            rsa_private_op(&envelope, &keys::HOST_MODULUS, &keys::HOST_PRIVATE_EXPONENT)?;

        let mut payload = Vec::with_capacity(174);
        payload.extend_from_slice(&signature);
        payload.extend_from_slice(&encrypted_session[82..]);
        Self::command(transport, SacCommand::Cmd4, &payload, 0)?;
        Ok(())
    }

    fn step5<T: DriveTransport>(&mut self, transport: &mut T) -> Result<(), SacdError> {
        let data = Self::command(transport, SacCommand::Cmd5, &[], 174)?;

        let outer = rsa_public_op(&data[0..RSA_BLOCK], &self.drive_modulus)?;
        if outer[0] != 0x6a {
            return Err(SacdError::SacFailed("bad session blob marker"));
        }
        if outer[1..17] != self.host_random {
            return Err(SacdError::SacFailed("host random not echoed"));
        }

        // Reassemble the inner ciphertext: 82 bytes from the outer
        // plaintext, 46 trailing bytes from the response.
        let mut inner = [0u8; RSA_BLOCK];
        inner[..64].copy_from_slice(&outer[25..89]);
        inner[64..82].copy_from_slice(&outer[89..107]);
        inner[82..].copy_from_slice(&data[128..174]);

        let plain = rsa_private_op(&inner, &keys::HOST_MODULUS, &keys::HOST_PRIVATE_EXPONENT)?;
        let drive_session_random = pkcs1_unpad_type2(&plain)?;
        if drive_session_random.len() != 16 {
            return Err(SacdError::SacFailed("bad session random length"));
        }

        let digest = sha1_digest(&[&self.host_session_random, &drive_session_random]);
        self.session_key.copy_from_slice(&digest[..16]);
        Ok(())
    }

    fn step6<T: DriveTransport>(&mut self, transport: &mut T) -> Result<DiscKey, SacdError> {
        let data = Self::command(transport, SacCommand::Cmd6, &[], 48)?;

        let mut block = [0u8; 48];
        block.copy_from_slice(&data[..48]);
        aes128_cbc_decrypt_in_place(&self.session_key, &keys::SESSION_IV, &mut block)?;

        let mut key = [0u8; 16];
        key.copy_from_slice(&block[0x20..0x30]);
        block.zeroize();
        Ok(DiscKey(key))
    }
}

/// Fixed IV used for per-disc sector decryption.
pub(crate) fn disc_iv() -> [u8; 16] {
    keys::DISC_IV
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ScriptedDrive, Tamper};
    use crate::transport::SacCommand;

    fn drive(tamper: Tamper) -> ScriptedDrive {
        let image = vec![0u8; 4 * 2048];
        ScriptedDrive::new(&image, [0x42; 16]).with_tamper(tamper)
    }

    #[test]
    fn full_exchange_recovers_the_disc_key() {
        let mut transport = drive(Tamper::None);
        let key = SacSession::authenticate(&mut transport).unwrap();
        assert_eq!(key.as_bytes(), &[0x42; 16]);
        assert_eq!(transport.bd_keys_seen.len(), 2);
        assert_eq!(
            transport.commands_seen,
            vec![
                SacCommand::Cmd0,
                SacCommand::Cmd2,
                SacCommand::Cmd3,
                SacCommand::Cmd4,
                SacCommand::Cmd5,
                SacCommand::Cmd6,
            ]
        );
    }

    #[test]
    fn non_zero_status_aborts_the_exchange() {
        let mut transport = drive(Tamper::BadStatus(SacCommand::Cmd3));
        assert!(matches!(
            SacSession::authenticate(&mut transport),
            Err(SacdError::SacFailed(_))
        ));
        // Nothing past the failing command.
        assert_eq!(transport.commands_seen.last(), Some(&SacCommand::Cmd3));
    }

    #[test]
    fn bad_certificate_marker_is_tamper() {
        let mut transport = drive(Tamper::BadCertMarker);
        assert!(matches!(
            SacSession::authenticate(&mut transport),
            Err(SacdError::SacFailed(_))
        ));
    }

    #[test]
    fn corrupt_ca_signature_fails_verification() {
        let mut transport = drive(Tamper::BadCaSignature);
        assert!(SacSession::authenticate(&mut transport).is_err());
    }

    #[test]
    fn wrong_host_random_echo_is_tamper() {
        let mut transport = drive(Tamper::WrongHostRandom);
        assert!(matches!(
            SacSession::authenticate(&mut transport),
            Err(SacdError::SacFailed(_))
        ));
    }

    #[test]
    fn missing_disc_surfaces_before_any_command() {
        let mut transport = drive(Tamper::NoDisc);
        assert!(matches!(
            SacSession::authenticate(&mut transport),
            Err(SacdError::NoDisc)
        ));
        assert!(transport.commands_seen.is_empty());
    }

    #[test]
    fn key_material_zeroises() {
        let mut key = DiscKey([0x42; 16]);
        key.zeroize();
        assert_eq!(key.0, [0u8; 16]);

        let mut session = SacSession::new();
        session.session_key = [0xAB; 16];
        session.host_random = [0xCD; 16];
        session.zeroize();
        assert_eq!(session.session_key, [0u8; 16]);
        assert_eq!(session.host_random, [0u8; 16]);
    }
}
