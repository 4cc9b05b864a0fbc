//! End-to-end: capabilities → WMTS source → dispatcher → cache.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, GenericImageView, ImageFormat, Rgba, RgbaImage};
use orthotile::cache::{CacheOptions, CachedTile, SourceDirectories, TileCacheStore};
use orthotile::capabilities::{load_capabilities, CapabilitiesCache};
use orthotile::fetch::{
    AsyncHttpClient, DispatcherConfig, FetchDispatcher, FetchError, FetchTimeouts, HttpResponse,
    NoTilePolicy, TileOutcome,
};
use orthotile::projection::{BuiltinRegistry, ProjectionRegistry, WebMercator};
use orthotile::source::{TileSource, WmtsOptions, WmtsTileSource};
use tempfile::TempDir;

const CAPABILITIES_URL: &str = "https://maps.example.net/wmts/WMTSCapabilities.xml";
const KVP_ENDPOINT: &str = "https://maps.example.net/wmts/tile";

const CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Capabilities xmlns="http://www.opengis.net/wmts/1.0" xmlns:ows="http://www.opengis.net/ows/1.1"
    xmlns:xlink="http://www.w3.org/1999/xlink" version="1.0.0">
  <ows:OperationsMetadata>
    <ows:Operation name="GetTile">
      <ows:DCP><ows:HTTP>
        <ows:Get xlink:href="https://maps.example.net/wmts/tile?">
          <ows:Constraint name="GetEncoding"><ows:AllowedValues><ows:Value>KVP</ows:Value></ows:AllowedValues></ows:Constraint>
        </ows:Get>
      </ows:HTTP></ows:DCP>
    </ows:Operation>
  </ows:OperationsMetadata>
  <Contents>
    <Layer>
      <ows:Title>Orthophoto</ows:Title>
      <ows:Identifier>ortho</ows:Identifier>
      <Style isDefault="true"><ows:Identifier>default</ows:Identifier></Style>
      <Format>image/png</Format>
      <TileMatrixSetLink><TileMatrixSet>google</TileMatrixSet></TileMatrixSetLink>
    </Layer>
    <Layer>
      <ows:Identifier>elevation</ows:Identifier>
      <Format>application/x-protobuf</Format>
      <TileMatrixSetLink><TileMatrixSet>google</TileMatrixSet></TileMatrixSetLink>
    </Layer>
    <TileMatrixSet>
      <ows:Identifier>google</ows:Identifier>
      <ows:SupportedCRS>urn:ogc:def:crs:EPSG::3857</ows:SupportedCRS>
      <TileMatrix>
        <ows:Identifier>0</ows:Identifier>
        <ScaleDenominator>2236329056.1148712</ScaleDenominator>
        <TopLeftCorner>-20037508.3427892 20037508.3427892</TopLeftCorner>
        <TileWidth>64</TileWidth><TileHeight>64</TileHeight>
        <MatrixWidth>1</MatrixWidth><MatrixHeight>1</MatrixHeight>
      </TileMatrix>
      <TileMatrix>
        <ows:Identifier>1</ows:Identifier>
        <ScaleDenominator>1118164528.0574356</ScaleDenominator>
        <TopLeftCorner>-20037508.3427892 20037508.3427892</TopLeftCorner>
        <TileWidth>64</TileWidth><TileHeight>64</TileHeight>
        <MatrixWidth>2</MatrixWidth><MatrixHeight>2</MatrixHeight>
      </TileMatrix>
      <TileMatrix>
        <ows:Identifier>2</ows:Identifier>
        <ScaleDenominator>559082264.0287178</ScaleDenominator>
        <TopLeftCorner>-20037508.3427892 20037508.3427892</TopLeftCorner>
        <TileWidth>64</TileWidth><TileHeight>64</TileHeight>
        <MatrixWidth>4</MatrixWidth><MatrixHeight>4</MatrixHeight>
      </TileMatrix>
    </TileMatrixSet>
  </Contents>
</Capabilities>"#;

/// Serves canned responses and counts requests per URL. Clones share state.
#[derive(Clone, Default)]
struct FakeServer {
    responses: Arc<Mutex<HashMap<String, HttpResponse>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
    total: Arc<AtomicUsize>,
}

impl FakeServer {
    fn serve(&self, url: &str, response: HttpResponse) {
        self.responses.lock().unwrap().insert(url.to_string(), response);
    }

    fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl AsyncHttpClient for FakeServer {
    async fn get(
        &self,
        url: &str,
        _headers: &[(String, String)],
        _timeouts: FetchTimeouts,
    ) -> Result<HttpResponse, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        let response = self.responses.lock().unwrap().get(url).cloned();
        Ok(response.unwrap_or_else(|| HttpResponse::new(404, Vec::new(), Vec::new())))
    }
}

fn png(size: u32, color: [u8; 4]) -> HttpResponse {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(size, size, Rgba(color)));
    let mut body = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut body), ImageFormat::Png)
        .unwrap();
    HttpResponse::new(200, vec![("Content-Type".into(), "image/png".into())], body)
}

fn tile_url(zoom: u8, row: u32, col: u32) -> String {
    format!(
        "{}?SERVICE=WMTS&REQUEST=GetTile&VERSION=1.0.0&LAYER=ortho&STYLE=default\
         &FORMAT=image/png&tileMatrixSet=google&tileMatrix={}&tileRow={}&tileCol={}",
        KVP_ENDPOINT, zoom, row, col
    )
}

struct Fixture {
    _dir: TempDir,
    server: FakeServer,
    source: Arc<WmtsTileSource>,
    dispatcher: FetchDispatcher<FakeServer>,
    cache_dir: std::path::PathBuf,
}

async fn fixture(no_tile: NoTilePolicy) -> Fixture {
    let dir = TempDir::new().unwrap();
    let server = FakeServer::default();
    server.serve(
        CAPABILITIES_URL,
        HttpResponse::new(200, Vec::new(), CAPABILITIES.as_bytes().to_vec()),
    );

    let registry: Arc<dyn ProjectionRegistry> = Arc::new(BuiltinRegistry::new());
    let documents = CapabilitiesCache::new(dir.path().join("capabilities"));
    let capabilities = load_capabilities(
        &server,
        CAPABILITIES_URL,
        FetchTimeouts::default(),
        Some(&documents),
        registry.as_ref(),
    )
    .await
    .unwrap();

    let directories = SourceDirectories::new(dir.path().join("tiles"));
    let cache_dir = directories.directory_for(CAPABILITIES_URL).unwrap();
    let cache = Arc::new(TileCacheStore::open(&cache_dir, CacheOptions::new(64)).unwrap());

    let source = WmtsTileSource::new(
        Arc::new(capabilities),
        "ortho",
        WmtsOptions {
            no_tile,
            ..WmtsOptions::default()
        },
        registry,
        cache,
    )
    .unwrap();
    source.init_projection("EPSG:3857").unwrap();

    let dispatcher = FetchDispatcher::new(server.clone(), DispatcherConfig::default());
    Fixture {
        _dir: dir,
        server,
        source: Arc::new(source),
        dispatcher,
        cache_dir,
    }
}

#[tokio::test]
async fn test_unsupported_layer_dropped() {
    let f = fixture(NoTilePolicy::default()).await;
    assert_eq!(f.source.capabilities().layer_identifiers(), vec!["ortho"]);
}

#[tokio::test]
async fn test_fetch_store_and_reuse() {
    let f = fixture(NoTilePolicy::default()).await;
    f.server.serve(&tile_url(1, 0, 1), png(64, [200, 0, 0, 255]));
    let source: Arc<dyn TileSource> = f.source.clone();

    let (a, b) = tokio::join!(
        f.dispatcher.fetch(Arc::clone(&source), 1, 0, 1),
        f.dispatcher.fetch(Arc::clone(&source), 1, 0, 1)
    );
    assert!(matches!(a, TileOutcome::Loaded { from_cache: false, .. }));
    assert!(b.is_loaded());
    assert_eq!(f.server.hits(&tile_url(1, 0, 1)), 1);

    let again = f.dispatcher.fetch(Arc::clone(&source), 1, 0, 1).await;
    assert!(matches!(again, TileOutcome::Loaded { from_cache: true, .. }));
    assert_eq!(f.server.hits(&tile_url(1, 0, 1)), 1);
    f.source.cache().save_index().unwrap();

    // A fresh store over the same directory still has the tile.
    let reopened = TileCacheStore::open(&f.cache_dir, CacheOptions::new(64)).unwrap();
    let key = source.cache_key(1, 0, 1).unwrap();
    match reopened.exact_match(
        key.projection.as_ref(),
        key.pixels_per_unit,
        key.east,
        key.north,
        false,
    ) {
        Some(CachedTile::Image(image)) => {
            assert_eq!(image.dimensions(), (64, 64));
            assert_eq!(image.to_rgba8().get_pixel(10, 10), &Rgba([200, 0, 0, 255]));
        }
        other => panic!("expected cached image, got {other:?}"),
    }
}

#[tokio::test]
async fn test_partial_preview_from_coarser_zoom() {
    let f = fixture(NoTilePolicy::default()).await;
    f.server.serve(&tile_url(1, 0, 0), png(64, [0, 0, 255, 255]));
    let source: Arc<dyn TileSource> = f.source.clone();

    assert!(f.dispatcher.fetch(Arc::clone(&source), 0, 0, 1).await.is_loaded());

    // Zoom-2 tile (1, 1) lies inside the zoom-1 tile (0, 0).
    let key = source.cache_key(1, 1, 2).unwrap();
    let preview = f
        .source
        .cache()
        .partial_match(&WebMercator, key.pixels_per_unit, key.east, key.north)
        .expect("composed preview");
    assert_eq!(preview.dimensions(), (64, 64));
    assert_eq!(preview.get_pixel(32, 32), &Rgba([0, 0, 255, 255]));

    let stats = f.source.cache().stats();
    assert_eq!(stats.partial_hits, 1);
}

#[tokio::test]
async fn test_no_tile_is_remembered() {
    let f = fixture(NoTilePolicy::new(vec![404], Vec::new())).await;
    let source: Arc<dyn TileSource> = f.source.clone();
    let before = f.server.total();

    for _ in 0..3 {
        let outcome = f.dispatcher.fetch(Arc::clone(&source), 3, 3, 2).await;
        assert!(matches!(outcome, TileOutcome::NoTileAtZoom));
    }
    assert_eq!(f.server.total() - before, 1);
}

#[tokio::test]
async fn test_server_error_fails_single_tile() {
    let f = fixture(NoTilePolicy::default()).await;
    f.server.serve(
        &tile_url(2, 0, 0),
        HttpResponse::new(500, Vec::new(), b"tile renderer crashed".to_vec()),
    );
    f.server.serve(&tile_url(2, 0, 1), png(64, [0, 255, 0, 255]));
    let source: Arc<dyn TileSource> = f.source.clone();

    let (broken, fine) = tokio::join!(
        f.dispatcher.fetch(Arc::clone(&source), 0, 0, 2),
        f.dispatcher.fetch(Arc::clone(&source), 1, 0, 2)
    );

    match broken {
        TileOutcome::Failed { message, .. } => assert!(message.contains("tile renderer crashed")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(fine.is_loaded());
}
