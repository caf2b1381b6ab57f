//! End-to-end tests: real MDX/MDD files served through the worker

mod common;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tempfile::TempDir;

use mdict_hub::discovery::encode_group_id;
use mdict_hub::{
    DictionaryService, EngineConfig, EntryContent, JsonFileStore, MdictBackend, RedirectFailure,
    StateStore, TranscodeError, Transcoder,
};

/// Prefixes the input with a WAV-looking tag instead of running a program
struct TaggingTranscoder;

#[async_trait]
impl Transcoder for TaggingTranscoder {
    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, TranscodeError> {
        let mut out = b"RIFF".to_vec();
        out.extend(input);
        Ok(out)
    }
}

fn write_bundle(dir: &Path) {
    common::write_mdx(
        &dir.join("a_one.mdx"),
        "First",
        &[
            ("color", "hue (one)"),
            ("colour", "@@@LINK=color"),
            ("loop1", "@@@LINK=loop2"),
            ("loop2", "@@@LINK=loop1"),
        ],
    );
    common::write_mdd(
        &dir.join("a_one.mdd"),
        &[("\\img\\pic.png", b"PNG"), ("\\say.spx", b"SPEEX")],
    );
    std::fs::write(dir.join("a_one.css"), "body { color: red; }").unwrap();
    common::write_mdx(&dir.join("b_two.mdx"), "Second", &[("colour", "the colour (two)")]);
}

async fn start(tmp: &TempDir) -> DictionaryService {
    let dicts = tmp.path().join("dicts");
    std::fs::create_dir(&dicts).unwrap();
    write_bundle(&dicts);

    let mut service = DictionaryService::start(
        Arc::new(MdictBackend),
        Arc::new(TaggingTranscoder),
        Arc::new(JsonFileStore::new(tmp.path().join("state.json"))),
        EngineConfig::default(),
    )
    .unwrap();
    assert!(service.add_scan_path(&dicts).unwrap());
    service.discover().await.unwrap();
    service
}

fn ids(tmp: &TempDir) -> (String, String) {
    let dicts = tmp.path().join("dicts");
    (
        encode_group_id(&dicts.join("a_one.mdx")),
        encode_group_id(&dicts.join("b_two.mdx")),
    )
}

#[tokio::test]
async fn test_discover_groups_bundle_files() {
    let tmp = TempDir::new().unwrap();
    let service = start(&tmp).await;
    let (one, two) = ids(&tmp);

    let groups = service.groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].id, one);
    assert_eq!(groups[1].id, two);
    assert_eq!(groups[0].resources.len(), 2);
    assert!(groups[1].resources.is_empty());

    let saved = JsonFileStore::new(tmp.path().join("state.json")).load().unwrap();
    assert_eq!(saved.scan_paths, [tmp.path().join("dicts")]);
    assert!(saved.dictionaries.contains_key(&one));
    assert!(saved.dictionaries.contains_key(&two));

    service.shutdown().await;
}

#[tokio::test]
async fn test_lookup_follows_redirects_per_dictionary() {
    let tmp = TempDir::new().unwrap();
    let service = start(&tmp).await;
    let (one, two) = ids(&tmp);

    let report = service.load().await.unwrap();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.loaded.len(), 2);
    assert_eq!(report.loaded[0].name, "First");
    assert_eq!(report.loaded[0].archives, 1);

    let records = service.lookup("colour").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].dictionary_id, one);
    assert_eq!(records[0].headword, "color");
    assert_eq!(records[0].definition().map(str::trim_end), Some("hue (one)"));
    assert_eq!(records[1].dictionary_id, two);
    assert_eq!(records[1].headword, "colour");
    assert_eq!(records[1].definition().map(str::trim_end), Some("the colour (two)"));

    let single = service.lookup_in_dict("colour", &two).await.unwrap().unwrap();
    assert_eq!(single.dictionary_name, "Second");

    assert!(service.lookup("absent").await.unwrap().is_empty());

    service.shutdown().await;
}

#[tokio::test]
async fn test_redirect_cycle_is_reported() {
    let tmp = TempDir::new().unwrap();
    let service = start(&tmp).await;
    service.load().await.unwrap();

    let records = service.lookup("loop1").await.unwrap();
    assert_eq!(records.len(), 1);
    match &records[0].content {
        EntryContent::RedirectFailed(RedirectFailure::CycleDetected { chain }) => {
            assert_eq!(chain.first().map(String::as_str), Some("loop1"));
            assert!(chain.iter().any(|w| w == "loop2"));
        }
        other => panic!("expected a cycle, got {:?}", other),
    }

    service.shutdown().await;
}

#[tokio::test]
async fn test_resources_and_assets() {
    let tmp = TempDir::new().unwrap();
    let service = start(&tmp).await;
    let (one, two) = ids(&tmp);
    service.load().await.unwrap();

    let png = service.get_resource("file://img/pic.png", &one).await.unwrap().unwrap();
    assert_eq!(png.mime_type, "image/png");
    assert_eq!(BASE64.decode(png.data).unwrap(), b"PNG");

    let audio = service.get_resource("sound://say.spx", &one).await.unwrap().unwrap();
    assert_eq!(audio.mime_type, "audio/wav");
    assert_eq!(BASE64.decode(audio.data).unwrap(), b"RIFFSPEEX");

    assert!(service.get_resource("sound://say.spx", &two).await.unwrap().is_none());
    assert!(service.get_resource("missing.png", &one).await.unwrap().is_none());

    let paths = service.asset_paths(&one).unwrap();
    let assets = service.get_assets(paths).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].content, "body { color: red; }");

    service.shutdown().await;
}

#[tokio::test]
async fn test_disabled_dictionary_is_not_loaded() {
    let tmp = TempDir::new().unwrap();
    let service = start(&tmp).await;
    let (one, two) = ids(&tmp);

    service.set_enabled(&two, false).unwrap();
    let report = service.load().await.unwrap();
    assert_eq!(report.loaded.len(), 1);
    assert_eq!(report.loaded[0].id, one);

    let records = service.lookup("colour").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].dictionary_id, one);

    assert_eq!(service.prefix("col", 10).await.unwrap(), ["color", "colour"]);

    service.shutdown().await;
}
