//! Column codec.
//!
//! Converts field values to their stored column representation and back:
//! JSONB fields become JSON documents, encrypted fields become base64 text
//! of `nonce || ciphertext`. The cipher itself is injected through the
//! [`Cipher`] trait.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::{CodecError, CodecErrorKind, Error};
use crate::metadata::{ColumnMeta, TableMetadata};
use crate::model::Model;
use crate::row::Row;
use crate::value::Value;

/// Required key length for [`AesGcmCipher`].
pub const KEY_LEN: usize = 32;

/// Nonce length prepended to every ciphertext.
pub const NONCE_LEN: usize = 12;

/// Authenticated encryption capability.
pub trait Cipher: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> std::result::Result<Vec<u8>, CodecErrorKind>;

    fn decrypt(&self, ciphertext: &[u8], key: &[u8])
    -> std::result::Result<Vec<u8>, CodecErrorKind>;
}

/// AES-256-GCM with a random 96-bit nonce prepended to the ciphertext.
#[derive(Debug, Default, Clone, Copy)]
pub struct AesGcmCipher;

fn check_key(key: &[u8]) -> std::result::Result<(), CodecErrorKind> {
    if key.len() == KEY_LEN {
        Ok(())
    } else {
        Err(CodecErrorKind::KeySize {
            expected: KEY_LEN,
            actual: key.len(),
        })
    }
}

impl Cipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> std::result::Result<Vec<u8>, CodecErrorKind> {
        check_key(key)?;
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CodecErrorKind::KeySize {
            expected: KEY_LEN,
            actual: key.len(),
        })?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|_| CodecErrorKind::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(
        &self,
        ciphertext: &[u8],
        key: &[u8],
    ) -> std::result::Result<Vec<u8>, CodecErrorKind> {
        check_key(key)?;
        if ciphertext.len() < NONCE_LEN {
            return Err(CodecErrorKind::Truncated {
                len: ciphertext.len(),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CodecErrorKind::KeySize {
            expected: KEY_LEN,
            actual: key.len(),
        })?;
        let (nonce, payload) = ciphertext.split_at(NONCE_LEN);
        cipher
            .decrypt(Nonce::from_slice(nonce), payload)
            .map_err(|_| CodecErrorKind::Decrypt)
    }
}

/// Per-column encode/decode with an injected cipher and key.
#[derive(Clone)]
pub struct ColumnCodec {
    cipher: Arc<dyn Cipher>,
    key: Option<Arc<[u8]>>,
}

impl fmt::Debug for ColumnCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnCodec")
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl Default for ColumnCodec {
    fn default() -> Self {
        Self::new(Arc::new(AesGcmCipher), None)
    }
}

impl ColumnCodec {
    pub fn new(cipher: Arc<dyn Cipher>, key: Option<Vec<u8>>) -> Self {
        Self {
            cipher,
            key: key.map(Arc::from),
        }
    }

    /// Encode a field value for storage.
    ///
    /// Returns `None` when the column must be left out of the statement
    /// entirely (a JSONB field holding nothing).
    #[allow(clippy::result_large_err)]
    pub fn encode(&self, table: &str, column: &ColumnMeta, value: Value) -> Result<Option<Value>> {
        let wrap = |kind: CodecErrorKind| codec_error(table, column.column, kind);

        if column.jsonb {
            let json = match value {
                Value::Null => return Ok(None),
                Value::Json(serde_json::Value::Null) => return Ok(None),
                Value::Json(serde_json::Value::Array(items)) if items.is_empty() => {
                    return Ok(None);
                }
                Value::Json(json) => json,
                other => return Ok(Some(other)),
            };
            if column.encrypted {
                let stored = self.seal(json.to_string().as_bytes()).map_err(wrap)?;
                return Ok(Some(Value::Text(stored)));
            }
            return Ok(Some(Value::Json(json)));
        }

        if column.encrypted {
            return match value {
                Value::Null => Ok(Some(Value::Null)),
                Value::Text(s) => {
                    let stored = self.seal(s.as_bytes()).map_err(wrap)?;
                    Ok(Some(Value::Text(stored)))
                }
                other => Err(wrap(CodecErrorKind::Unsupported {
                    actual: other.type_name(),
                })),
            };
        }

        Ok(Some(value))
    }

    /// Decode a stored column value into the field representation.
    #[allow(clippy::result_large_err)]
    pub fn decode(&self, table: &str, column: &ColumnMeta, value: Value) -> Result<Value> {
        let wrap = |kind: CodecErrorKind| codec_error(table, column.column, kind);

        if value.is_null() {
            return Ok(Value::Null);
        }

        if column.encrypted {
            let stored = match value {
                Value::Text(stored) => stored,
                other => {
                    return Err(wrap(CodecErrorKind::NotText {
                        actual: other.type_name(),
                    }));
                }
            };
            let plaintext = self.open(&stored).map_err(wrap)?;
            if column.jsonb {
                return serde_json::from_slice(&plaintext)
                    .map(Value::Json)
                    .map_err(|e| wrap(CodecErrorKind::Json(e.to_string())));
            }
            return String::from_utf8(plaintext)
                .map(Value::Text)
                .map_err(|_| wrap(CodecErrorKind::Utf8));
        }

        if column.jsonb {
            return match value {
                Value::Json(json) => Ok(Value::Json(json)),
                Value::Text(s) => serde_json::from_str(&s)
                    .map(Value::Json)
                    .map_err(|e| wrap(CodecErrorKind::Json(e.to_string()))),
                Value::Bytes(b) => serde_json::from_slice(&b)
                    .map(Value::Json)
                    .map_err(|e| wrap(CodecErrorKind::Json(e.to_string()))),
                other => Err(wrap(CodecErrorKind::Json(format!(
                    "cannot read JSON from {}",
                    other.type_name()
                )))),
            };
        }

        Ok(value)
    }

    /// Encrypt and base64-encode `plaintext`.
    pub fn seal(&self, plaintext: &[u8]) -> std::result::Result<String, CodecErrorKind> {
        let key = self.key.as_deref().ok_or(CodecErrorKind::MissingKey)?;
        let sealed = self.cipher.encrypt(plaintext, key)?;
        Ok(BASE64.encode(sealed))
    }

    /// Reverse of [`seal`](Self::seal).
    pub fn open(&self, stored: &str) -> std::result::Result<Vec<u8>, CodecErrorKind> {
        let key = self.key.as_deref().ok_or(CodecErrorKind::MissingKey)?;
        let sealed = BASE64
            .decode(stored)
            .map_err(|e| CodecErrorKind::Base64(e.to_string()))?;
        self.cipher.decrypt(&sealed, key)
    }
}

fn codec_error(table: &str, column: &str, kind: CodecErrorKind) -> Error {
    Error::Codec(CodecError {
        table: table.to_string(),
        column: column.to_string(),
        kind,
    })
}

/// Serialize a JSONB field for `Model::get_field`.
#[allow(clippy::result_large_err)]
pub fn to_json_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(Value::Json(serde_json::to_value(value)?))
}

/// Deserialize a JSONB field for `Model::set_field`.
///
/// SQL NULL becomes JSON `null`, falling back to an empty array so that
/// `Vec` fields read back as empty.
#[allow(clippy::result_large_err)]
pub fn from_json_value<T: DeserializeOwned>(value: Value) -> Result<T> {
    let json = serde_json::Value::try_from(value)?;
    if json.is_null() {
        if let Ok(parsed) = serde_json::from_value(serde_json::Value::Null) {
            return Ok(parsed);
        }
        return Ok(serde_json::from_value(serde_json::Value::Array(Vec::new()))?);
    }
    Ok(serde_json::from_value(json)?)
}

/// Populate `record` from a fetched row, decoding every stored column.
///
/// Columns missing from the row are left untouched.
#[allow(clippy::result_large_err)]
pub fn hydrate<M: Model>(
    record: &mut M,
    row: &Row,
    meta: &TableMetadata,
    codec: &ColumnCodec,
) -> Result<()> {
    for column in &meta.columns {
        if let Some(stored) = row.get_by_name(column.column) {
            let value = codec.decode(meta.table, column, stored.clone())?;
            record.set_field(column.field, value)?;
        }
    }
    Ok(())
}
