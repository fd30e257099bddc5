//! HTTP client for the model sidecar.
//!
//! The sidecar owns the audio encoder, UNet, VAE and face detector. Every
//! payload is JSON except image and audio uploads, which are sent as raw
//! bodies:
//!
//! | route                       | request            | response                   |
//! |-----------------------------|--------------------|----------------------------|
//! | `GET /health`               |                    | `{status, models_loaded}`  |
//! | `POST /audio/features`      | audio bytes        | `{features: [Tensor]}`     |
//! | `POST /vae/encode`          | PNG                | `Tensor`                   |
//! | `POST /unet/predict`        | `{features, latents}` | `{images: [base64 PNG]}` |
//! | `POST /face/detect?bbox_shift=` | PNG            | `{bbox: [x1,y1,x2,y2] \| null}` |

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use talkhead_media::image_ops::{decode_rgb, encode_png};
use talkhead_media::{FaceDetector, MediaError, MediaResult, RgbImage};
use talkhead_models::{AudioFeature, BBox, Latent};

use crate::engine::{check_batch, InferenceEngine};
use crate::error::{MlClientError, MlResult};

/// Sidecar connection settings.
#[derive(Debug, Clone)]
pub struct MlClientConfig {
    /// Base URL, e.g. `http://127.0.0.1:8001`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for MlClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8001".to_string(),
            timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl MlClientConfig {
    /// Read `TALKHEAD_ML_URL` and `TALKHEAD_ML_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("TALKHEAD_ML_URL").unwrap_or(defaults.base_url),
            timeout: std::env::var("TALKHEAD_ML_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            connect_timeout: defaults.connect_timeout,
        }
    }
}

/// Sidecar health report.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SidecarHealth {
    pub status: String,
    #[serde(default)]
    pub models_loaded: bool,
}

impl SidecarHealth {
    pub fn is_ready(&self) -> bool {
        self.models_loaded && matches!(self.status.as_str(), "ok" | "healthy")
    }
}

#[derive(Debug, Deserialize)]
struct FeaturesResponse {
    features: Vec<AudioFeature>,
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    features: &'a [AudioFeature],
    latents: &'a [Latent],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    bbox: Option<BBox>,
}

/// Client for the model sidecar.
///
/// Implements [`InferenceEngine`] and [`FaceDetector`] by blocking on the
/// runtime it was created in, so those methods must be called from a
/// blocking thread (`spawn_blocking`), never from async code.
#[derive(Clone)]
pub struct MlClient {
    http: Client,
    base_url: String,
    handle: Handle,
}

impl MlClient {
    /// Create a client bound to the current tokio runtime.
    pub fn new(config: &MlClientConfig) -> MlResult<Self> {
        let handle = Handle::try_current()
            .map_err(|e| MlClientError::unavailable(format!("no tokio runtime: {}", e)))?;

        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(4)
            .user_agent(concat!("talkhead-ml-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            handle,
        })
    }

    /// Create a client and verify the sidecar reports its models loaded.
    pub async fn connect(config: &MlClientConfig) -> MlResult<Self> {
        let client = Self::new(config)?;
        let health = client.health().await?;
        if !health.is_ready() {
            return Err(MlClientError::unavailable(format!(
                "sidecar at {} is not ready (status {})",
                client.base_url, health.status
            )));
        }
        info!(url = %client.base_url, "Connected to model sidecar");
        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Query the sidecar health endpoint.
    pub async fn health(&self) -> MlResult<SidecarHealth> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| MlClientError::unavailable(e.to_string()))?;
        Self::parse(resp).await
    }

    /// Encode an audio clip into per-frame features.
    pub async fn audio_features(&self, audio: Vec<u8>) -> MlResult<Vec<AudioFeature>> {
        let resp: FeaturesResponse = self.post_bytes("/audio/features", audio, "application/octet-stream").await?;
        validate_tensors(&resp.features)?;
        debug!(chunks = resp.features.len(), "Encoded audio features");
        Ok(resp.features)
    }

    /// Encode a face crop into its latent.
    pub async fn vae_encode(&self, face: &RgbImage) -> MlResult<Latent> {
        let latent: Latent = self.post_bytes("/vae/encode", encode_png(face)?, "image/png").await?;
        latent
            .validate()
            .map_err(|e| MlClientError::invalid_response(e.to_string()))?;
        Ok(latent)
    }

    /// Generate and decode one batch of face crops.
    pub async fn unet_predict(&self, features: &[AudioFeature], latents: &[Latent]) -> MlResult<Vec<RgbImage>> {
        check_batch(features, latents)?;

        let resp = self
            .http
            .post(format!("{}/unet/predict", self.base_url))
            .json(&PredictRequest { features, latents })
            .send()
            .await?;
        let body: PredictResponse = Self::parse(resp).await?;

        if body.images.len() != features.len() {
            return Err(MlClientError::invalid_response(format!(
                "expected {} images, got {}",
                features.len(),
                body.images.len()
            )));
        }

        body.images
            .iter()
            .map(|b64| -> MlResult<RgbImage> {
                let png = BASE64
                    .decode(b64)
                    .map_err(|e| MlClientError::invalid_response(format!("bad base64 image: {}", e)))?;
                Ok(decode_rgb(&png)?)
            })
            .collect()
    }

    /// Detect the face box of one frame.
    pub async fn face_detect(&self, frame: &RgbImage, bbox_shift: i32) -> MlResult<Option<BBox>> {
        let resp = self
            .http
            .post(format!("{}/face/detect", self.base_url))
            .query(&[("bbox_shift", bbox_shift)])
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(encode_png(frame)?)
            .send()
            .await?;
        let body: DetectResponse = Self::parse(resp).await?;
        Ok(body.bbox)
    }

    async fn post_bytes<T: DeserializeOwned>(&self, route: &str, body: Vec<u8>, content_type: &str) -> MlResult<T> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, route))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;
        Self::parse(resp).await
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> MlResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Model sidecar request failed");
            return Err(MlClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| MlClientError::invalid_response(e.to_string()))
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.handle.block_on(fut)
    }
}

fn validate_tensors(tensors: &[AudioFeature]) -> MlResult<()> {
    for (i, t) in tensors.iter().enumerate() {
        t.validate()
            .map_err(|e| MlClientError::invalid_response(format!("feature {}: {}", i, e)))?;
    }
    Ok(())
}

impl InferenceEngine for MlClient {
    fn encode_audio(&self, audio: &[u8]) -> MlResult<Vec<AudioFeature>> {
        self.block_on(self.audio_features(audio.to_vec()))
    }

    fn encode_latent(&self, face: &RgbImage) -> MlResult<Latent> {
        self.block_on(self.vae_encode(face))
    }

    fn predict_and_decode(&self, features: &[AudioFeature], latents: &[Latent]) -> MlResult<Vec<RgbImage>> {
        self.block_on(self.unet_predict(features, latents))
    }

    fn name(&self) -> &'static str {
        "ml-sidecar"
    }
}

impl FaceDetector for MlClient {
    fn detect(&self, frame: &RgbImage, bbox_shift: i32) -> MediaResult<Option<BBox>> {
        self.block_on(self.face_detect(frame, bbox_shift))
            .map_err(|e| MediaError::detection_failed(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "ml-sidecar"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use serde_json::json;
    use wiremock::matchers::{body_bytes, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> MlClientConfig {
        MlClientConfig {
            base_url: server.uri(),
            ..Default::default()
        }
    }

    fn png_b64(shade: u8) -> String {
        let img = RgbImage::from_pixel(4, 4, Rgb([shade, shade, shade]));
        BASE64.encode(encode_png(&img).unwrap())
    }

    #[tokio::test]
    async fn test_connect_requires_ready_sidecar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "models_loaded": false})))
            .mount(&server)
            .await;

        let err = MlClient::connect(&config(&server)).await.err().unwrap();
        assert!(matches!(err, MlClientError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_connect_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "models_loaded": true})))
            .mount(&server)
            .await;

        let client = MlClient::connect(&config(&server)).await.unwrap();
        assert_eq!(client.base_url(), server.uri());
    }

    #[tokio::test]
    async fn test_audio_features() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/features"))
            .and(body_bytes(b"RIFF".to_vec()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [
                    {"shape": [2], "values": [0.1, 0.2]},
                    {"shape": [2], "values": [0.3, 0.4]}
                ]
            })))
            .mount(&server)
            .await;

        let client = MlClient::new(&config(&server)).unwrap();
        let features = client.audio_features(b"RIFF".to_vec()).await.unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[1].values, vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn test_malformed_tensor_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/audio/features"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "features": [{"shape": [3], "values": [0.1]}]
            })))
            .mount(&server)
            .await;

        let client = MlClient::new(&config(&server)).unwrap();
        let err = client.audio_features(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, MlClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_unet_predict_decodes_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unet/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "images": [png_b64(10), png_b64(20)]
            })))
            .mount(&server)
            .await;

        let client = MlClient::new(&config(&server)).unwrap();
        let t = Latent::new(vec![1], vec![0.0]).unwrap();
        let images = client
            .unet_predict(&[t.clone(), t.clone()], &[t.clone(), t])
            .await
            .unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].get_pixel(0, 0), &Rgb([20, 20, 20]));
    }

    #[tokio::test]
    async fn test_unet_image_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/unet/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": [png_b64(1)]})))
            .mount(&server)
            .await;

        let client = MlClient::new(&config(&server)).unwrap();
        let t = Latent::new(vec![1], vec![0.0]).unwrap();
        let err = client
            .unet_predict(&[t.clone(), t.clone()], &[t.clone(), t])
            .await
            .unwrap_err();
        assert!(matches!(err, MlClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_face_detect_passes_shift() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/face/detect"))
            .and(query_param("bbox_shift", "-4"))
            .and(header("content-type", "image/png"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bbox": [1, 2, 30, 40]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/face/detect"))
            .and(query_param("bbox_shift", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bbox": null})))
            .mount(&server)
            .await;

        let client = MlClient::new(&config(&server)).unwrap();
        let frame = RgbImage::new(8, 8);
        assert_eq!(
            client.face_detect(&frame, -4).await.unwrap(),
            Some(BBox::new(1, 2, 30, 40))
        );
        assert_eq!(client.face_detect(&frame, 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vae/encode"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad image"))
            .mount(&server)
            .await;

        let client = MlClient::new(&config(&server)).unwrap();
        let err = client.vae_encode(&RgbImage::new(4, 4)).await.unwrap_err();
        match &err {
            MlClientError::Status { status, body } => {
                assert_eq!(*status, 422);
                assert_eq!(body, "bad image");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_input_error());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_engine_trait_from_blocking_thread() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/vae/encode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"shape": [2], "values": [1.0, 2.0]})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/face/detect"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"bbox": [0, 0, 4, 4]})))
            .mount(&server)
            .await;

        let client = MlClient::new(&config(&server)).unwrap();
        let (latent, bbox) = tokio::task::spawn_blocking(move || {
            let face = RgbImage::new(4, 4);
            let latent = client.encode_latent(&face).unwrap();
            let bbox = FaceDetector::detect(&client, &face, 0).unwrap();
            (latent, bbox)
        })
        .await
        .unwrap();

        assert_eq!(latent.shape, vec![2]);
        assert_eq!(bbox, Some(BBox::new(0, 0, 4, 4)));
    }
}
