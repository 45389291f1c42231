//! Publishing the finished render to object storage.

use std::path::{Component, Path, PathBuf};

use tracing::info;

use opencine_core::{Error, JobContext, Result};

/// Uploads a local artifact and returns its durable location.
pub trait Publisher: Send + Sync {
    fn upload(&self, local: &Path, key: &str, ctx: &JobContext) -> Result<String>;
}

/// Reject keys that are empty, absolute, or climb out of the bucket.
fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if key.is_empty() || escapes {
        return Err(Error::Internal(format!("invalid object key {:?}", key)));
    }
    Ok(())
}

/// Bucket emulated on the local filesystem: `<root>/<bucket>/<key>`.
pub struct LocalBucketPublisher {
    root: PathBuf,
    bucket: String,
}

impl LocalBucketPublisher {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    /// Where `key` lands on disk.
    pub fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(&self.bucket).join(key)
    }
}

impl Publisher for LocalBucketPublisher {
    fn upload(&self, local: &Path, key: &str, ctx: &JobContext) -> Result<String> {
        ctx.check()?;
        validate_key(key)?;

        let dest = self.object_path(key);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(local, &dest)?;

        let url = format!("file://{}/{}", self.bucket, key);
        info!("Published {} to {}", local.display(), url);
        Ok(url)
    }
}

#[cfg(feature = "s3")]
pub use s3::S3Publisher;

#[cfg(feature = "s3")]
mod s3 {
    use std::path::Path;

    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;
    use tokio::runtime::Handle;
    use tracing::info;

    use super::{validate_key, Publisher};
    use opencine_core::{Error, JobContext, Result};

    /// Publisher backed by an S3 bucket.
    ///
    /// Uploads run on the async runtime captured at construction; `upload`
    /// itself must be called from a blocking thread.
    pub struct S3Publisher {
        client: Client,
        bucket: String,
        runtime: Handle,
    }

    impl S3Publisher {
        /// Build a client from the ambient AWS credential chain.
        pub async fn from_env(bucket: impl Into<String>, region: impl Into<String>) -> Self {
            let conf = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(Region::new(region.into()))
                .load()
                .await;
            Self {
                client: Client::new(&conf),
                bucket: bucket.into(),
                runtime: Handle::current(),
            }
        }
    }

    impl Publisher for S3Publisher {
        fn upload(&self, local: &Path, key: &str, ctx: &JobContext) -> Result<String> {
            ctx.check()?;
            validate_key(key)?;

            self.runtime.block_on(async {
                let body = ByteStream::from_path(local)
                    .await
                    .map_err(|e| Error::Internal(format!("cannot read {}: {}", local.display(), e)))?;
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .content_type("video/mp4")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| Error::Http(format!("S3 upload failed: {}", e)))?;
                Ok::<_, Error>(())
            })?;

            let url = format!("s3://{}/{}", self.bucket, key);
            info!("Published {} to {}", local.display(), url);
            Ok(url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_publish_copies_under_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("final.mp4");
        std::fs::write(&video, b"movie").unwrap();

        let publisher = LocalBucketPublisher::new(tmp.path().join("bucket"), "renders-dev");
        let url = publisher
            .upload(&video, "renders/ab12cd34ef/final.mp4", &JobContext::background())
            .unwrap();

        assert_eq!(url, "file://renders-dev/renders/ab12cd34ef/final.mp4");
        let stored = publisher.object_path("renders/ab12cd34ef/final.mp4");
        assert_eq!(std::fs::read(stored).unwrap(), b"movie");
    }

    #[test]
    fn test_local_publish_rejects_escaping_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("final.mp4");
        std::fs::write(&video, b"movie").unwrap();
        let publisher = LocalBucketPublisher::new(tmp.path(), "b");

        for key in ["", "../escape.mp4", "/abs/final.mp4", "renders/../../x"] {
            assert!(
                publisher.upload(&video, key, &JobContext::background()).is_err(),
                "accepted {:?}",
                key
            );
        }
    }

    #[test]
    fn test_local_publish_missing_source() {
        let tmp = tempfile::tempdir().unwrap();
        let publisher = LocalBucketPublisher::new(tmp.path(), "b");
        let result = publisher.upload(
            &tmp.path().join("nope.mp4"),
            "renders/x/final.mp4",
            &JobContext::background(),
        );
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_cancelled_publish_does_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let video = tmp.path().join("final.mp4");
        std::fs::write(&video, b"movie").unwrap();
        let publisher = LocalBucketPublisher::new(tmp.path(), "b");

        let ctx = JobContext::background();
        ctx.cancel();
        assert!(publisher.upload(&video, "renders/x/final.mp4", &ctx).is_err());
        assert!(!publisher.object_path("renders/x/final.mp4").exists());
    }
}
