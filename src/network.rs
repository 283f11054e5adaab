use async_trait::async_trait;
use log::{debug, info};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::NetworkError;
use crate::types::{NewSession, PhotoRecord};

/// Backend collaborator for session creation and photo upload
#[async_trait]
pub trait NetworkClient: Send + Sync {
    /// `POST /api/sessions`, returns the backend-issued session id
    async fn create_session(&self, request: &NewSession) -> Result<String, NetworkError>;

    /// `POST /api/photos`; the response body is not consumed
    async fn upload_photo(&self, photo: PhotoRecord) -> Result<(), NetworkError>;
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    session_id: String,
}

/// JSON/multipart client for the field backend
pub struct HttpNetworkClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNetworkClient {
    /// No timeout is set unless one is given; a hung request only stalls
    /// its own capture.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Self {
        let mut builder =
            reqwest::Client::builder().user_agent(concat!("trench_capture/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|_| reqwest::Client::new());

        HttpNetworkClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> NetworkError {
    if e.is_timeout() {
        NetworkError::Timeout
    } else if let Some(status) = e.status() {
        NetworkError::Http(status.as_u16())
    } else {
        NetworkError::Request(e.to_string())
    }
}

/// Multipart text fields for a photo upload, in wire order.
/// Unknown tilt/heading are omitted rather than sent as zero.
pub fn photo_form_fields(photo: &PhotoRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("session_id", photo.session_id.clone()),
        ("seq", photo.sequence_number.to_string()),
        ("lat", photo.coordinate.latitude.to_string()),
        ("lng", photo.coordinate.longitude.to_string()),
    ];
    if let Some(pitch) = photo.pitch {
        fields.push(("tilt_deg", pitch.to_string()));
    }
    if let Some(heading) = photo.heading {
        fields.push(("heading_deg", heading.to_string()));
    }
    fields.push(("zoom", photo.zoom_factor.to_string()));
    fields.push(("filename", photo.filename.clone()));
    fields
}

#[async_trait]
impl NetworkClient for HttpNetworkClient {
    async fn create_session(&self, request: &NewSession) -> Result<String, NetworkError> {
        let response = self
            .client
            .post(self.url("/api/sessions"))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Http(status.as_u16()));
        }

        let created: SessionCreated = response
            .json()
            .await
            .map_err(|e| NetworkError::MalformedResponse(e.to_string()))?;
        info!("[network] session {} created", created.session_id);
        Ok(created.session_id)
    }

    async fn upload_photo(&self, photo: PhotoRecord) -> Result<(), NetworkError> {
        let mut form = Form::new();
        for (name, value) in photo_form_fields(&photo) {
            form = form.text(name, value);
        }
        let size = photo.image_bytes.len();
        let file = Part::bytes(photo.image_bytes)
            .file_name(photo.filename.clone())
            .mime_str("image/jpeg")
            .map_err(|e| NetworkError::Request(e.to_string()))?;
        form = form.part("file", file);

        let response = self
            .client
            .post(self.url("/api/photos"))
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Http(status.as_u16()));
        }
        debug!("[network] uploaded {} ({} bytes)", photo.filename, size);
        Ok(())
    }
}

/// Summary of a photo accepted by the offline backend
#[derive(Clone, Debug, PartialEq)]
pub struct StoredPhoto {
    pub session_id: String,
    pub sequence_number: u32,
    pub filename: String,
    pub bytes: usize,
}

/// In-memory backend for dry runs: issues session ids and keeps upload
/// summaries instead of sending anything.
#[derive(Default)]
pub struct OfflineBackend {
    sessions: Mutex<Vec<NewSession>>,
    photos: Mutex<Vec<StoredPhoto>>,
    next_id: AtomicU64,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> Vec<NewSession> {
        self.sessions.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn photos(&self) -> Vec<StoredPhoto> {
        self.photos.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NetworkClient for OfflineBackend {
    async fn create_session(&self, request: &NewSession) -> Result<String, NetworkError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.sessions
            .lock()
            .map_err(|_| NetworkError::Request("offline session store poisoned".to_string()))?
            .push(request.clone());
        let session_id = format!("offline-{}", id);
        info!("[offline] session {} for {}", session_id, request.site_name);
        Ok(session_id)
    }

    async fn upload_photo(&self, photo: PhotoRecord) -> Result<(), NetworkError> {
        info!(
            "[offline] stored {} ({} bytes)",
            photo.filename,
            photo.image_bytes.len()
        );
        self.photos
            .lock()
            .map_err(|_| NetworkError::Request("offline photo store poisoned".to_string()))?
            .push(StoredPhoto {
                session_id: photo.session_id,
                sequence_number: photo.sequence_number,
                filename: photo.filename,
                bytes: photo.image_bytes.len(),
            });
        Ok(())
    }
}
