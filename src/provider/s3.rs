//! S3 backend over the AWS SDK.
//!
//! Chunked uploads map 1:1 onto S3 multipart uploads; the multipart upload id
//! is carried across calls in the session's provider data under
//! [`AWS_UPLOAD_ID_KEY`]. Presigned POSTs are built by hand (policy document
//! + SigV4 signature) since the SDK only presigns plain requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{ChunkedStorage, FileMeta, Metadata, PresignedPost, PresignedPoster, StorageProvider};
use crate::error::{Result, UploadError};
use crate::manager::DEFAULT_PRESIGNED_POST_TTL;
use crate::session::{ChunkPart, ChunkSession, Clock, NewChunkSession};
use crate::validation::DEFAULT_MAX_FILE_SIZE;

/// Provider-data key holding the S3 multipart upload id.
pub const AWS_UPLOAD_ID_KEY: &str = "aws_upload_id";

/// S3 object storage bound to one bucket.
pub struct S3Provider {
    client: aws_sdk_s3::Client,
    bucket: String,
    base_path: Option<String>,
    clock: Clock,
}

impl S3Provider {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            base_path: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Key prefix prepended to every object path.
    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    /// Replace the clock. Used by tests to pin presigned-post timestamps.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn object_key(&self, path: &str) -> String {
        match &self.base_path {
            Some(base) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
            None => path.to_string(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        let key = self.object_key(path);
        if key.starts_with('/') {
            key
        } else {
            format!("/{key}")
        }
    }

    fn region(&self) -> String {
        self.client
            .config()
            .region()
            .map(|r| r.as_ref().to_string())
            .unwrap_or_else(|| "us-east-1".to_string())
    }

    fn bucket_endpoint(&self, region: &str) -> String {
        if region.is_empty() || region == "us-east-1" {
            format!("https://{}.s3.amazonaws.com", self.bucket)
        } else {
            format!("https://{}.s3.{}.amazonaws.com", self.bucket, region)
        }
    }

    fn upload_id(session: &ChunkSession) -> Result<String> {
        match session.provider_data.get(AWS_UPLOAD_ID_KEY) {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(_) => Err(UploadError::backend_msg(
                "s3 upload id",
                "invalid upload id stored in session",
            )),
            None => Err(UploadError::backend_msg(
                "s3 upload id",
                "upload id not found in session",
            )),
        }
    }
}

/// Translate recorded parts into the SDK's completion list, ascending by
/// part number. Every part needs the ETag S3 returned for it.
fn completed_parts(session: &ChunkSession) -> Result<Vec<CompletedPart>> {
    if session.uploaded_parts.is_empty() {
        return Err(UploadError::backend_msg(
            "s3 complete chunked",
            format!("no uploaded parts recorded for session {}", session.id),
        ));
    }

    session
        .uploaded_parts
        .values()
        .map(|part| {
            if part.etag.is_empty() {
                return Err(UploadError::backend_msg(
                    "s3 complete chunked",
                    format!("missing etag for part {}", part.index),
                ));
            }
            Ok(CompletedPart::builder()
                .e_tag(&part.etag)
                .part_number(part.index as i32 + 1)
                .build())
        })
        .collect()
}

#[async_trait]
impl StorageProvider for S3Provider {
    #[tracing::instrument(name = "s3.upload_file", skip(self, content), fields(s3.bucket = %self.bucket, s3.key = %path, bytes = content.len()), err)]
    async fn upload_file(&self, path: &str, content: Bytes, options: &Metadata) -> Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(path))
            .body(ByteStream::from(content))
            .set_content_type(options.content_type.clone())
            .set_cache_control(options.cache_control.clone())
            .acl(ObjectCannedAcl::Private)
            .send()
            .await
            .map_err(|err| UploadError::backend("s3 put object", err))?;

        Ok(self.object_url(path))
    }

    async fn get_file(&self, path: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(path))
            .send()
            .await
            .map_err(|err| UploadError::backend("s3 get object", err))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|err| UploadError::backend("s3 read object body", err))?;
        Ok(data.into_bytes())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(path))
            .send()
            .await
            .map_err(|err| UploadError::backend("s3 delete object", err))?;
        Ok(())
    }

    async fn presigned_url(&self, path: &str, expires: Duration) -> Result<String> {
        let config = PresigningConfig::expires_in(expires)
            .map_err(|err| UploadError::backend("s3 presign config", err))?;
        let req = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(path))
            .presigned(config)
            .await
            .map_err(|err| UploadError::backend("s3 presign get object", err))?;
        Ok(req.uri().to_string())
    }

    async fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(UploadError::ProviderValidation(
                "bucket not configured".into(),
            ));
        }
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|err| UploadError::ProviderValidation(format!("head bucket: {err}")))?;
        Ok(())
    }

    fn chunked(&self) -> Option<&dyn ChunkedStorage> {
        Some(self)
    }

    fn presigned_post(&self) -> Option<&dyn PresignedPoster> {
        Some(self)
    }
}

#[async_trait]
impl ChunkedStorage for S3Provider {
    #[tracing::instrument(name = "s3.initiate_chunked", skip(self, session), fields(s3.bucket = %self.bucket, s3.key = %session.key), err)]
    async fn initiate_chunked(&self, session: &mut NewChunkSession) -> Result<()> {
        let resp = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(self.object_key(&session.key))
            .set_content_type(session.metadata.content_type.clone())
            .set_cache_control(session.metadata.cache_control.clone())
            .acl(ObjectCannedAcl::Private)
            .send()
            .await
            .map_err(|err| UploadError::backend("s3 create multipart upload", err))?;

        let upload_id = resp.upload_id().unwrap_or_default();
        if upload_id.is_empty() {
            return Err(UploadError::backend_msg(
                "s3 create multipart upload",
                "no upload id returned",
            ));
        }
        session
            .provider_data
            .insert(AWS_UPLOAD_ID_KEY.to_string(), serde_json::json!(upload_id));
        Ok(())
    }

    #[tracing::instrument(name = "s3.upload_chunk", skip(self, session, payload), fields(s3.bucket = %self.bucket, session_id = %session.id, index = index, bytes = payload.len()), err)]
    async fn upload_chunk(
        &self,
        session: &ChunkSession,
        index: u32,
        payload: Bytes,
    ) -> Result<ChunkPart> {
        let upload_id = Self::upload_id(session)?;
        let size = payload.len() as u64;

        let resp = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(self.object_key(&session.key))
            .upload_id(upload_id)
            .part_number(index as i32 + 1)
            .body(ByteStream::from(payload))
            .send()
            .await
            .map_err(|err| UploadError::backend("s3 upload part", err))?;

        Ok(ChunkPart {
            index,
            size,
            checksum: String::new(),
            etag: resp.e_tag().unwrap_or_default().to_string(),
            uploaded_at: Some((self.clock)()),
        })
    }

    #[tracing::instrument(name = "s3.complete_chunked", skip(self, session), fields(s3.bucket = %self.bucket, session_id = %session.id, parts = session.uploaded_parts.len()), err)]
    async fn complete_chunked(&self, session: &ChunkSession) -> Result<FileMeta> {
        let upload_id = Self::upload_id(session)?;
        let parts = completed_parts(session)?;

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(self.object_key(&session.key))
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| UploadError::backend("s3 complete multipart upload", err))?;

        Ok(FileMeta {
            content: None,
            content_type: session.metadata.content_type.clone().unwrap_or_default(),
            name: session.key.clone(),
            original_name: session.key.clone(),
            size: session.total_size,
            url: self.object_url(&session.key),
        })
    }

    async fn abort_chunked(&self, session: &ChunkSession) -> Result<()> {
        let upload_id = Self::upload_id(session)?;
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(self.object_key(&session.key))
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|err| UploadError::backend("s3 abort multipart upload", err))?;
        Ok(())
    }
}

#[async_trait]
impl PresignedPoster for S3Provider {
    #[tracing::instrument(name = "s3.create_presigned_post", skip(self, metadata), fields(s3.bucket = %self.bucket, s3.key = %key), err)]
    async fn create_presigned_post(&self, key: &str, metadata: &Metadata) -> Result<PresignedPost> {
        let credentials_provider = self
            .client
            .config()
            .credentials_provider()
            .ok_or_else(|| {
                UploadError::backend_msg("s3 presigned post", "credentials provider not configured")
            })?;
        let creds = credentials_provider
            .provide_credentials()
            .await
            .map_err(|err| UploadError::backend("s3 retrieve credentials", err))?;

        let now: DateTime<Utc> = (self.clock)();
        let region = self.region();
        let final_key = self.object_key(key);

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let algorithm = "AWS4-HMAC-SHA256";
        let credential = format!(
            "{}/{}/{}/s3/aws4_request",
            creds.access_key_id(),
            date_stamp,
            region
        );
        let acl = if metadata.public { "public-read" } else { "private" };

        let mut conditions = vec![
            serde_json::json!({ "bucket": self.bucket }),
            serde_json::json!({ "key": final_key }),
            serde_json::json!({ "acl": acl }),
            serde_json::json!({ "x-amz-algorithm": algorithm }),
            serde_json::json!({ "x-amz-credential": credential }),
            serde_json::json!({ "x-amz-date": amz_date }),
            serde_json::json!([
                "content-length-range",
                "1",
                DEFAULT_MAX_FILE_SIZE.to_string()
            ]),
        ];
        if let Some(content_type) = &metadata.content_type {
            conditions.push(serde_json::json!({ "Content-Type": content_type }));
        }
        if let Some(cache_control) = &metadata.cache_control {
            conditions.push(serde_json::json!({ "Cache-Control": cache_control }));
        }
        if let Some(token) = creds.session_token() {
            conditions.push(serde_json::json!({ "x-amz-security-token": token }));
        }

        let ttl = metadata.ttl.unwrap_or(DEFAULT_PRESIGNED_POST_TTL);
        let expiry = now
            + chrono::Duration::from_std(ttl)
                .map_err(|err| UploadError::backend("s3 presigned post ttl", err))?;

        let policy = serde_json::json!({
            "expiration": expiry.to_rfc3339_opts(SecondsFormat::Secs, true),
            "conditions": conditions,
        });
        let policy_base64 = BASE64.encode(policy.to_string());

        let signing_key = derive_signing_key(creds.secret_access_key(), &date_stamp, &region);
        let signature = hex::encode(hmac_sha256(&signing_key, &policy_base64));

        let mut fields = HashMap::from([
            ("key".to_string(), final_key),
            ("acl".to_string(), acl.to_string()),
            ("Policy".to_string(), policy_base64),
            ("X-Amz-Algorithm".to_string(), algorithm.to_string()),
            ("X-Amz-Credential".to_string(), credential),
            ("X-Amz-Date".to_string(), amz_date),
            ("X-Amz-Signature".to_string(), signature),
            ("success_action_status".to_string(), "201".to_string()),
        ]);
        if let Some(content_type) = &metadata.content_type {
            fields.insert("Content-Type".to_string(), content_type.clone());
        }
        if let Some(cache_control) = &metadata.cache_control {
            fields.insert("Cache-Control".to_string(), cache_control.clone());
        }
        if let Some(token) = creds.session_token() {
            fields.insert("X-Amz-Security-Token".to_string(), token.to_string());
        }

        Ok(PresignedPost {
            url: self.bucket_endpoint(&region),
            method: "POST".to_string(),
            fields,
            expiry,
        })
    }
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date_stamp);
    let k_region = hmac_sha256(&k_date, region);
    let k_service = hmac_sha256(&k_region, "s3");
    hmac_sha256(&k_service, "aws4_request")
}

fn hmac_sha256(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC-SHA256 accepts any key length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}
