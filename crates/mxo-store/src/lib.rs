#![forbid(unsafe_code)]

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use mxo_matrix::{Matrix, MatrixError, element_count};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub const ENVELOPE_SCHEMA_VERSION: u32 = 1;
const BYTES_PER_ENTRY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NameInvalid(String),
    NotFound { name: String },
    Io { path: PathBuf, detail: String },
    EnvelopeInvalid(&'static str),
    SchemaVersionUnsupported { found: u32 },
    PayloadLength { expected: usize, actual: usize },
    DigestMismatch { expected: String, actual: String },
    Matrix(MatrixError),
}

impl StoreError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::NameInvalid(_) => "store_name_invalid",
            Self::NotFound { .. } => "store_fixture_not_found",
            Self::Io { .. } => "store_io_failed",
            Self::EnvelopeInvalid(_) => "store_envelope_invalid",
            Self::SchemaVersionUnsupported { .. } => "store_schema_version_unsupported",
            Self::PayloadLength { .. } => "store_payload_length_mismatch",
            Self::DigestMismatch { .. } => "store_digest_mismatch",
            Self::Matrix(_) => "store_matrix_invalid",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameInvalid(token) => {
                write!(f, "logical name '{token}' contains unsupported characters")
            }
            Self::NotFound { name } => write!(f, "no fixture saved under '{name}'"),
            Self::Io { path, detail } => write!(f, "io failure at {}: {detail}", path.display()),
            Self::EnvelopeInvalid(detail) => write!(f, "fixture envelope invalid: {detail}"),
            Self::SchemaVersionUnsupported { found } => {
                write!(
                    f,
                    "envelope schema version {found} unsupported (expected {ENVELOPE_SCHEMA_VERSION})"
                )
            }
            Self::PayloadLength { expected, actual } => {
                write!(f, "payload length mismatch expected={expected} actual={actual}")
            }
            Self::DigestMismatch { expected, actual } => {
                write!(f, "payload digest mismatch expected={expected} actual={actual}")
            }
            Self::Matrix(err) => write!(f, "decoded matrix invalid: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<MatrixError> for StoreError {
    fn from(err: MatrixError) -> Self {
        Self::Matrix(err)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MatrixEnvelope {
    schema_version: u32,
    name: String,
    rows: usize,
    cols: usize,
    sha256: String,
    payload_b64: String,
}

fn valid_token(token: &str) -> bool {
    !token.is_empty()
        && !token.starts_with('.')
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn payload_bytes(matrix: &Matrix) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(matrix.values().len() * BYTES_PER_ENTRY);
    for value in matrix.values() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn digest_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// SHA-256 over the little-endian payload bytes of a matrix. The same
/// digest is embedded in persisted envelopes and in run log records.
#[must_use]
pub fn payload_digest(matrix: &Matrix) -> String {
    digest_hex(&payload_bytes(matrix))
}

/// Persists matrices under logical names scoped to `root/namespace/`.
/// Distinct namespaces never collide, so concurrent scenario instances
/// can share one root.
#[derive(Debug, Clone)]
pub struct FixtureStore {
    root: PathBuf,
    namespace: String,
}

impl FixtureStore {
    pub fn new(root: impl Into<PathBuf>, namespace: &str) -> Result<Self, StoreError> {
        if !valid_token(namespace) {
            return Err(StoreError::NameInvalid(namespace.to_string()));
        }
        Ok(Self {
            root: root.into(),
            namespace: namespace.to_string(),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.root.join(&self.namespace)
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        if !valid_token(name) {
            return Err(StoreError::NameInvalid(name.to_string()));
        }
        Ok(self.dir().join(format!("{name}.json")))
    }

    pub fn save(&self, name: &str, matrix: &Matrix) -> Result<PathBuf, StoreError> {
        let path = self.entry_path(name)?;
        let bytes = payload_bytes(matrix);
        let envelope = MatrixEnvelope {
            schema_version: ENVELOPE_SCHEMA_VERSION,
            name: name.to_string(),
            rows: matrix.rows(),
            cols: matrix.cols(),
            sha256: digest_hex(&bytes),
            payload_b64: BASE64.encode(&bytes),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| StoreError::Io {
                path: parent.to_path_buf(),
                detail: err.to_string(),
            })?;
        }
        let raw = serde_json::to_string_pretty(&envelope)
            .map_err(|_| StoreError::EnvelopeInvalid("envelope serialization failed"))?;
        fs::write(&path, raw).map_err(|err| StoreError::Io {
            path: path.clone(),
            detail: err.to_string(),
        })?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Matrix, StoreError> {
        let path = self.entry_path(name)?;
        let raw = fs::read_to_string(&path).map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound {
                    name: name.to_string(),
                }
            } else {
                StoreError::Io {
                    path: path.clone(),
                    detail: err.to_string(),
                }
            }
        })?;

        let envelope: MatrixEnvelope = serde_json::from_str(&raw)
            .map_err(|_| StoreError::EnvelopeInvalid("envelope json malformed"))?;
        decode_envelope(&envelope)
    }

    /// Removes the whole namespace directory; loading any name
    /// afterwards reports `NotFound`.
    pub fn clear(&self) -> Result<(), StoreError> {
        let dir = self.dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io {
                path: dir,
                detail: err.to_string(),
            }),
        }
    }
}

fn decode_envelope(envelope: &MatrixEnvelope) -> Result<Matrix, StoreError> {
    if envelope.schema_version != ENVELOPE_SCHEMA_VERSION {
        return Err(StoreError::SchemaVersionUnsupported {
            found: envelope.schema_version,
        });
    }

    let count = element_count(envelope.rows, envelope.cols)?;
    let expected_len = count
        .checked_mul(BYTES_PER_ENTRY)
        .ok_or(StoreError::EnvelopeInvalid("payload byte count overflowed"))?;

    let bytes = BASE64
        .decode(&envelope.payload_b64)
        .map_err(|_| StoreError::EnvelopeInvalid("payload base64 malformed"))?;
    if bytes.len() != expected_len {
        return Err(StoreError::PayloadLength {
            expected: expected_len,
            actual: bytes.len(),
        });
    }

    let actual_digest = digest_hex(&bytes);
    if actual_digest != envelope.sha256 {
        return Err(StoreError::DigestMismatch {
            expected: envelope.sha256.clone(),
            actual: actual_digest,
        });
    }

    let values = bytes
        .chunks_exact(BYTES_PER_ENTRY)
        .map(|chunk| {
            let mut word = [0u8; BYTES_PER_ENTRY];
            word.copy_from_slice(chunk);
            f64::from_le_bytes(word)
        })
        .collect();
    Ok(Matrix::from_values(envelope.rows, envelope.cols, values)?)
}
