//! [`ObjectStore`] backed by `aws-sdk-s3`, configured for MinIO.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CompletedMultipartUpload, CompletedPart as S3CompletedPart,
    CreateBucketConfiguration,
};
use bytes::Bytes;
use futures::{stream, StreamExt};
use tracing::debug;

use super::client::{
    CompletedPart, ObjectInfo, ObjectReader, ObjectStore, ObjectStream, StoreError, UploadInfo,
};
use crate::config::MinioConfig;

/// Region that must not be sent as a bucket location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// S3 client bundle for one MinIO (or S3) endpoint.
#[derive(Clone)]
pub struct S3Store {
    client: aws_sdk_s3::Client,
    region: String,
}

impl S3Store {
    /// Build a client with static credentials and path-style addressing.
    pub async fn connect(cfg: &MinioConfig) -> Self {
        let credentials = Credentials::new(
            cfg.access_key.as_str(),
            cfg.secret_key.as_str(),
            None,
            None,
            "vault-config",
        );

        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        let client = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(&shared)
                .endpoint_url(cfg.endpoint_url())
                .force_path_style(true)
                .build(),
        );

        Self {
            client,
            region: cfg.region.clone(),
        }
    }
}

fn request_error<E>(operation: &'static str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    StoreError::Request {
        operation,
        status: err.raw_response().map(|resp| resp.status().as_u16()),
        code: err.code().map(str::to_owned),
        message: DisplayErrorContext(&err).to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn list_objects(&self, bucket: &str) -> ObjectStream {
        let pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .into_paginator()
            .send();

        stream::unfold(pages, |mut pages| async move {
            pages.next().await.map(|page| (page, pages))
        })
        .flat_map(|page| {
            let items: Vec<Result<ObjectInfo, StoreError>> = match page {
                Ok(out) => out
                    .contents()
                    .iter()
                    .map(|obj| {
                        Ok(ObjectInfo {
                            key: obj.key().unwrap_or_default().to_owned(),
                            size: obj.size().unwrap_or_default(),
                        })
                    })
                    .collect(),
                Err(e) => vec![Err(request_error("ListObjectsV2", e))],
            };
            stream::iter(items)
        })
        .boxed()
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectReader, StoreError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("GetObject", e))?;
        Ok(Box::pin(out.body.into_async_read()))
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = request_error("HeadBucket", e);
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn make_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut req = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            req = req.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        req.send()
            .await
            .map_err(|e| request_error("CreateBucket", e))?;
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
    ) -> Result<UploadInfo, StoreError> {
        let len = body.len();
        let out = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("PutObject", e))?;
        debug!(bucket, key, bytes = len, "object stored");

        Ok(UploadInfo {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            etag: out.e_tag().unwrap_or_default().to_owned(),
            version_id: out.version_id().unwrap_or_default().to_owned(),
        })
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let out = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| request_error("CreateMultipartUpload", e))?;

        out.upload_id()
            .map(str::to_owned)
            .ok_or_else(|| StoreError::request("CreateMultipartUpload", "response carried no upload id"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<CompletedPart, StoreError> {
        let out = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| request_error("UploadPart", e))?;

        Ok(CompletedPart {
            part_number,
            etag: out.e_tag().unwrap_or_default().to_owned(),
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<UploadInfo, StoreError> {
        let parts = parts
            .into_iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.etag)
                    .build()
            })
            .collect();

        let out = self
            .client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| request_error("CompleteMultipartUpload", e))?;

        Ok(UploadInfo {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            etag: out.e_tag().unwrap_or_default().to_owned(),
            version_id: out.version_id().unwrap_or_default().to_owned(),
        })
    }

    async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| request_error("AbortMultipartUpload", e))?;
        Ok(())
    }
}
