//! S3 client connections and the bounded connection pool.
//!
//! A connection wraps one configured S3 client. The pool holds a fixed set of
//! pre-built connections checked out under a condition variable; it is a
//! bounded-concurrency gate, not a thread source. Clients issue requests
//! independently, so the pool size caps the number of in-flight S3 requests.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex};
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::serde_types::Part;

use crate::error::ZarrError;
use crate::stream::S3Settings;

const OCTET_STREAM: &str = "application/octet-stream";

/// One reusable S3 client handle, bound to the configured bucket.
pub struct S3Connection {
    bucket: Box<Bucket>,
}

impl S3Connection {
    /// Build a client from the stream's S3 settings.
    ///
    /// Building a connection performs no network IO; failures surface on the
    /// first request.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the endpoint or credentials are
    /// malformed.
    pub fn new(settings: &S3Settings) -> Result<Self, ZarrError> {
        let region = Region::Custom {
            region: "us-east-1".to_string(),
            endpoint: settings.endpoint.clone(),
        };
        let credentials = Credentials::new(
            Some(&settings.access_key_id),
            Some(&settings.secret_access_key),
            None,
            None,
            None,
        )
        .map_err(|err| ZarrError::S3Error(err.to_string()))?;
        let bucket = Bucket::new(&settings.bucket_name, region, credentials)?.with_path_style();
        Ok(Self {
            bucket: Box::new(bucket),
        })
    }

    /// Whether the configured bucket exists. Used as a configuration-time
    /// probe before any frame is accepted.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the request fails.
    pub fn bucket_exists(&self) -> Result<bool, ZarrError> {
        Ok(self.bucket.exists()?)
    }

    /// Whether an object exists at `key`.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the request fails for any reason
    /// other than the object being absent.
    pub fn object_exists(&self, key: &str) -> Result<bool, ZarrError> {
        match self.bucket.head_object(key) {
            Ok((_, code)) => Ok(code == 200),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Store `bytes` at `key` as a single-part object.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the upload fails.
    pub fn put_object(&self, key: &str, bytes: &[u8]) -> Result<(), ZarrError> {
        let response = self.bucket.put_object(key, bytes)?;
        expect_ok(response.status_code(), "put object", key)
    }

    /// Delete the object at `key`.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the request fails.
    pub fn delete_object(&self, key: &str) -> Result<(), ZarrError> {
        self.bucket.delete_object(key)?;
        Ok(())
    }

    /// Begin a multipart upload at `key`, returning the upload id.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the request fails.
    pub fn create_multipart_upload(&self, key: &str) -> Result<String, ZarrError> {
        let response = self.bucket.initiate_multipart_upload(key, OCTET_STREAM)?;
        Ok(response.upload_id)
    }

    /// Upload one part of a multipart upload. Parts are numbered from one and
    /// must be at least 5 MiB, except the final part.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the upload fails.
    pub fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        bytes: Vec<u8>,
    ) -> Result<Part, ZarrError> {
        Ok(self
            .bucket
            .put_multipart_chunk(bytes, key, part_number, upload_id, OCTET_STREAM)?)
    }

    /// Complete a multipart upload from its accumulated parts.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the request fails.
    pub fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<(), ZarrError> {
        let response = self
            .bucket
            .complete_multipart_upload(key, upload_id, parts)?;
        expect_ok(response.status_code(), "complete multipart upload", key)
    }

    /// Abort a multipart upload, discarding its uploaded parts.
    ///
    /// # Errors
    /// Returns [`ZarrError::S3Error`] if the request fails.
    pub fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), ZarrError> {
        self.bucket.abort_upload(key, upload_id)?;
        Ok(())
    }
}

fn expect_ok(status_code: u16, what: &str, key: &str) -> Result<(), ZarrError> {
    if status_code == 200 {
        Ok(())
    } else {
        Err(ZarrError::S3Error(format!(
            "{what} for {key:?} returned HTTP {status_code}"
        )))
    }
}

/// A bounded pool of reusable S3 connections.
pub struct S3ConnectionPool {
    connections: Mutex<Vec<S3Connection>>,
    cv: Condvar,
    is_accepting_connections: AtomicBool,
}

impl S3ConnectionPool {
    /// Pre-build `n_connections` clients from the stream's S3 settings.
    ///
    /// # Errors
    /// Returns [`ZarrError::InvalidArgument`] if `n_connections` is zero, or
    /// [`ZarrError::S3Error`] if a client cannot be built.
    pub fn new(n_connections: usize, settings: &S3Settings) -> Result<Self, ZarrError> {
        if n_connections == 0 {
            return Err(ZarrError::InvalidArgument(
                "the S3 connection pool requires at least one connection".to_string(),
            ));
        }
        let connections = (0..n_connections)
            .map(|_| S3Connection::new(settings))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            connections: Mutex::new(connections),
            cv: Condvar::new(),
            is_accepting_connections: AtomicBool::new(true),
        })
    }

    /// Check out a connection, blocking until one is available.
    ///
    /// Returns [`None`] if the pool is shutting down.
    #[must_use]
    pub fn get_connection(&self) -> Option<S3Connection> {
        let mut connections = self.connections.lock();
        while connections.is_empty() && self.is_accepting_connections.load(Ordering::SeqCst) {
            self.cv.wait(&mut connections);
        }
        if !self.is_accepting_connections.load(Ordering::SeqCst) {
            return None;
        }
        connections.pop()
    }

    /// Return a checked-out connection and wake one waiter.
    pub fn return_connection(&self, connection: S3Connection) {
        let mut connections = self.connections.lock();
        connections.push(connection);
        drop(connections);
        self.cv.notify_one();
    }
}

impl Drop for S3ConnectionPool {
    fn drop(&mut self) {
        self.is_accepting_connections.store(false, Ordering::SeqCst);
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> S3Settings {
        S3Settings {
            endpoint: "http://localhost:9000".to_string(),
            bucket_name: "acquire-test".to_string(),
            access_key_id: "access".to_string(),
            secret_access_key: "secret".to_string(),
        }
    }

    #[test]
    fn pool_requires_connections() {
        assert!(S3ConnectionPool::new(0, &test_settings()).is_err());
    }

    #[test]
    fn pool_checkout_and_return() {
        // Building clients performs no IO, so pool mechanics are testable
        // without a live endpoint.
        let pool = S3ConnectionPool::new(2, &test_settings()).unwrap();
        let a = pool.get_connection().unwrap();
        let b = pool.get_connection().unwrap();
        assert!(pool.connections.lock().is_empty());
        pool.return_connection(a);
        pool.return_connection(b);
        assert_eq!(pool.connections.lock().len(), 2);
    }

    #[test]
    fn pool_shutdown_unblocks_waiters() {
        let pool = std::sync::Arc::new(S3ConnectionPool::new(1, &test_settings()).unwrap());
        let held = pool.get_connection().unwrap();

        let waiter_pool = pool.clone();
        let waiter = std::thread::spawn(move || waiter_pool.get_connection().is_none());

        // Give the waiter time to block, then shut the pool down.
        std::thread::sleep(std::time::Duration::from_millis(50));
        pool.is_accepting_connections.store(false, Ordering::SeqCst);
        pool.cv.notify_all();

        assert!(waiter.join().unwrap());
        drop(held);
    }
}
