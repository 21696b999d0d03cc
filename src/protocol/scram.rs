//! SCRAM-SHA-256 (RFC 5802) client conversation (spec §4.2). The math here
//! is lifted directly from the teacher's inline `sasl_hi`/HMAC chain in
//! its Postgres `authenticate()` loop, reshaped into a conversation object
//! so the connection FSM can drive it one message at a time instead of
//! interleaving crypto with socket I/O.

use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::digest::FixedOutput;
use sha2::Sha256;

use crate::error::ClientError;

type Result<T> = std::result::Result<T, ClientError>;
type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";

pub struct ScramClient {
  client_nonce: String,
  client_first_bare: String,
  salted_password: Option<[u8; 32]>,
  auth_message: Option<String>,
}

impl ScramClient {
  pub fn new() -> Self {
    let client_nonce = thread_rng().sample_iter(&Alphanumeric).take(24).map(char::from).collect::<String>();
    let client_first_bare = format!("n=,r={client_nonce}");
    Self {
      client_nonce,
      client_first_bare,
      salted_password: None,
      auth_message: None,
    }
  }

  /// The `SASLInitialResponse` payload: GS2 header + client-first-message.
  /// No channel binding is attempted (`n,,` — plain GS2 header), matching
  /// the teacher's TODO for SCRAM-SHA-256-PLUS.
  pub fn client_first_message(&self) -> String {
    format!("n,,{}", self.client_first_bare)
  }

  /// Consumes the server-first-message and a password, returning the
  /// `SASLResponse` client-final-message.
  pub fn client_final_message(&mut self, server_first_message: &str, password: &[u8]) -> Result<String> {
    let mut chunks = server_first_message.splitn(3, ',');
    let server_nonce = chunks
      .next()
      .and_then(|v| v.strip_prefix("r="))
      .ok_or_else(|| ClientError::Authentication("invalid SCRAM nonce".into()))?;

    if !server_nonce.starts_with(&self.client_nonce) {
      return Err(ClientError::Authentication("server nonce does not extend client nonce".into()));
    }

    let salt: Vec<u8> = chunks
      .next()
      .and_then(|v| v.strip_prefix("s="))
      .and_then(|v| base64::decode(v).ok())
      .ok_or_else(|| ClientError::Authentication("invalid SCRAM salt".into()))?;

    let iteration_count = chunks
      .next()
      .and_then(|v| v.strip_prefix("i="))
      .and_then(|v| v.parse::<usize>().ok())
      .ok_or_else(|| ClientError::Authentication("invalid SCRAM iteration count".into()))?;

    let salted_password = salted_password_hi(password, &salt, iteration_count);

    let client_key = HmacSha256::new_from_slice(&salted_password)
      .expect("HMAC accepts any key length")
      .chain_update(b"Client Key")
      .finalize()
      .into_bytes();

    let stored_key = Sha256::default().chain_update(client_key.as_slice()).finalize_fixed();

    let gs2_header = "n,,";
    let channel_binding = base64::encode(gs2_header);

    let auth_message = format!(
      "{},{},c={},r={}",
      self.client_first_bare, server_first_message, channel_binding, server_nonce
    );

    let client_signature = HmacSha256::new_from_slice(&stored_key)
      .expect("HMAC accepts any key length")
      .chain_update(auth_message.as_bytes())
      .finalize()
      .into_bytes();

    let mut client_proof = client_key;
    for (proof, signature) in client_proof.iter_mut().zip(client_signature) {
      *proof ^= signature;
    }

    self.salted_password = Some(salted_password);
    self.auth_message = Some(auth_message);

    Ok(format!(
      "c={},r={},p={}",
      channel_binding,
      server_nonce,
      base64::encode(client_proof)
    ))
  }

  /// Verifies the server's final signature (SASLFinal). Fails the
  /// connection on mismatch, per §7 (Authentication kind).
  pub fn verify_server_final(&self, server_final_message: &str) -> Result<()> {
    if let Some(err) = server_final_message.strip_prefix("e=") {
      return Err(ClientError::Authentication(err.to_string()));
    }

    let verifier = server_final_message
      .strip_prefix("v=")
      .ok_or_else(|| ClientError::Authentication("unexpected SCRAM final payload".into()))?;
    let verifier =
      base64::decode(verifier).map_err(|_| ClientError::Authentication("failed to decode SCRAM verifier".into()))?;

    let salted_password = self.salted_password.ok_or_else(|| {
      ClientError::Authentication("verify_server_final called before client_final_message".into())
    })?;
    let auth_message = self.auth_message.as_ref().expect("set alongside salted_password");

    let server_key = HmacSha256::new_from_slice(&salted_password)
      .expect("HMAC accepts any key length")
      .chain_update(b"Server Key")
      .finalize()
      .into_bytes();

    HmacSha256::new_from_slice(&server_key)
      .expect("HMAC accepts any key length")
      .chain_update(auth_message.as_bytes())
      .verify_slice(&verifier)
      .map_err(|_| ClientError::Authentication("SCRAM server signature mismatch".into()))
  }
}

impl Default for ScramClient {
  fn default() -> Self {
    Self::new()
  }
}

/// `Hi(password, salt, iterations)` from RFC 5802 §2.2.
fn salted_password_hi(password: &[u8], salt: &[u8], iterations: usize) -> [u8; 32] {
  let mut prev = HmacSha256::new_from_slice(password)
    .expect("HMAC accepts any key length")
    .chain_update(salt)
    .chain_update([0, 0, 0, 1])
    .finalize()
    .into_bytes();
  let mut hi = prev;

  for _ in 1..iterations {
    prev = HmacSha256::new_from_slice(password)
      .expect("HMAC accepts any key length")
      .chain_update(prev)
      .finalize()
      .into_bytes();

    for (hi, prev) in hi.iter_mut().zip(prev) {
      *hi ^= prev;
    }
  }

  hi.into()
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Hand-rolled server stub that performs the matching server-side SCRAM
  /// math, so we can check a real client/server handshake agrees without
  /// needing a live server.
  fn server_respond(password: &[u8], salt: &[u8], iterations: usize, client_nonce_prefix: &str) -> (String, String) {
    let server_nonce = format!("{client_nonce_prefix}SERVERHALF");
    let server_first = format!("r={},s={},i={}", server_nonce, base64::encode(salt), iterations);
    (server_first, server_nonce)
  }

  #[test]
  fn full_conversation_verifies_server_signature() {
    let password = b"hunter2";
    let salt = b"abcd1234";
    let iterations = 4096;

    let mut client = ScramClient::new();
    let client_first = client.client_first_message();
    let client_nonce = client_first.rsplit("r=").next().unwrap();

    let (server_first, server_nonce) = server_respond(password, salt, iterations, client_nonce);
    let _client_final = client.client_final_message(&server_first, password).unwrap();

    // Reproduce the server-side verifier the same way the server would.
    let salted_password = salted_password_hi(password, salt, iterations);
    let client_key = HmacSha256::new_from_slice(&salted_password)
      .unwrap()
      .chain_update(b"Client Key")
      .finalize()
      .into_bytes();
    let _ = client_key;
    let server_key = HmacSha256::new_from_slice(&salted_password)
      .unwrap()
      .chain_update(b"Server Key")
      .finalize()
      .into_bytes();
    let auth_message = client.auth_message.clone().unwrap();
    let server_signature = HmacSha256::new_from_slice(&server_key)
      .unwrap()
      .chain_update(auth_message.as_bytes())
      .finalize()
      .into_bytes();

    let server_final = format!("v={}", base64::encode(server_signature));
    assert!(client.verify_server_final(&server_final).is_ok());
    let _ = server_nonce;
  }

  #[test]
  fn bad_server_signature_is_rejected() {
    let mut client = ScramClient::new();
    let client_first = client.client_first_message();
    let client_nonce = client_first.rsplit("r=").next().unwrap();
    let server_first = format!("r={}SERVERHALF,s={},i=4096", client_nonce, base64::encode(b"salt"));
    client.client_final_message(&server_first, b"hunter2").unwrap();

    let bogus = format!("v={}", base64::encode([0u8; 32]));
    assert!(client.verify_server_final(&bogus).is_err());
  }

  #[test]
  fn explicit_server_error_is_surfaced() {
    let mut client = ScramClient::new();
    let client_first = client.client_first_message();
    let client_nonce = client_first.rsplit("r=").next().unwrap();
    let server_first = format!("r={}SERVERHALF,s={},i=4096", client_nonce, base64::encode(b"salt"));
    client.client_final_message(&server_first, b"hunter2").unwrap();

    let err = client.verify_server_final("e=invalid-proof").unwrap_err();
    assert!(matches!(err, ClientError::Authentication(_)));
  }
}
