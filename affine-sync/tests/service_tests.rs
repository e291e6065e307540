//! End-to-end document operations against the in-memory sync server.

use std::sync::Arc;
use std::time::Duration;

use affine_core::block::BlockInput;
use affine_core::folders::{EntryType, FolderOp};
use affine_core::fractional::index_between;
use affine_core::tree::Placement;
use affine_core::CoreError;
use affine_sync::config::SyncConfig;
use affine_sync::memory::MemoryServer;
use affine_sync::protocol::EVENT_PUSH_DOC_UPDATE;
use affine_sync::service::{BlockSummary, DocService};
use affine_sync::{ServiceError, TransportError};

const WORKSPACE: &str = "ws1";

fn service(server: &MemoryServer) -> DocService {
    let mut config = SyncConfig::new("http://localhost:3010", WORKSPACE);
    config.request_timeout = Duration::from_millis(200);
    DocService::new(Arc::new(server.connector()), config)
}

/// Let spawned channel releases run.
async fn settle(server: &MemoryServer) {
    for _ in 0..20 {
        if server.open_channels() == 0 {
            break;
        }
        tokio::task::yield_now().await;
    }
}

fn list_items(blocks: &[BlockSummary]) -> Vec<&BlockSummary> {
    blocks.iter().filter(|b| b.flavour == "affine:list").collect()
}

#[tokio::test]
async fn test_create_and_read_doc() {
    let server = MemoryServer::new();
    let svc = service(&server);

    let id = svc
        .create_doc("Notes", Some("## Intro\n\nHello **world**\n"))
        .await
        .unwrap();
    assert!(server.has_doc(WORKSPACE, id.as_str()));

    let view = svc.read_markdown(id.as_str()).await.unwrap();
    assert_eq!(view.title, "Notes");
    assert_eq!(view.markdown, "# Notes\n\n## Intro\n\nHello **world**\n");
    assert_eq!(view.ranges.len(), 2);
    assert_eq!(view.ranges[0].start_line, 2);

    let pages = svc.list_docs().await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].id, id.as_str());
    assert_eq!(pages[0].title, "Notes");
}

#[tokio::test]
async fn test_append_heading_to_empty_doc() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc.create_doc("", None).await.unwrap();

    let input = BlockInput {
        level: Some(2),
        ..BlockInput::new("heading").with_text("Intro")
    };
    svc.append_block(id.as_str(), &input, &Placement::Default)
        .await
        .unwrap();

    let blocks = svc.read_blocks(id.as_str()).await.unwrap();
    let paragraphs: Vec<&BlockSummary> = blocks
        .iter()
        .filter(|b| b.flavour == "affine:paragraph")
        .collect();
    assert_eq!(paragraphs.len(), 1);
    assert_eq!(paragraphs[0].text.as_deref(), Some("Intro"));
    assert_eq!(svc.read_markdown(id.as_str()).await.unwrap().markdown, "## Intro\n");
}

#[tokio::test]
async fn test_every_operation_uses_one_channel() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc.create_doc("T", None).await.unwrap();
    svc.append_markdown(id.as_str(), "one\n").await.unwrap();
    svc.read_markdown(id.as_str()).await.unwrap();

    assert_eq!(server.connect_count(), 3);
    assert_eq!(server.open_channels(), 0);
}

#[tokio::test]
async fn test_reads_and_failed_edits_push_nothing() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc.create_doc("T", Some("same\n\nsame\n")).await.unwrap();
    let pushes = server.push_count();

    svc.read_markdown(id.as_str()).await.unwrap();
    svc.read_blocks(id.as_str()).await.unwrap();
    svc.list_docs().await.unwrap();
    let err = svc
        .patch_markdown(id.as_str(), "same", "other")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Core(CoreError::AmbiguousMatch { count: 2 })
    ));

    assert_eq!(server.push_count(), pushes);
    settle(&server).await;
    assert_eq!(server.open_channels(), 0);
}

#[tokio::test]
async fn test_patch_replaces_only_the_matching_item() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc
        .create_doc("", Some("- Item 1\n- Item 2\n- Item 3\n"))
        .await
        .unwrap();
    let before = svc.read_blocks(id.as_str()).await.unwrap();
    let before = list_items(&before);
    assert_eq!(before.len(), 3);

    let pushes = server.push_count();
    let outcome = svc
        .patch_markdown(id.as_str(), "- Item 2", "- Item 2 (edited)")
        .await
        .unwrap();
    assert_eq!(outcome.removed, vec![before[1].id.clone()]);
    assert_eq!(outcome.created.len(), 1);
    // One push for the doc, one for the page list.
    assert_eq!(server.pushed_docs()[pushes..], [id.to_string(), WORKSPACE.to_string()]);

    let after = svc.read_blocks(id.as_str()).await.unwrap();
    let after = list_items(&after);
    assert_eq!(after.len(), 3);
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[1].id, outcome.created[0]);
    assert_eq!(after[2].id, before[2].id);
    assert_eq!(after[1].text.as_deref(), Some("Item 2 (edited)"));
}

#[tokio::test]
async fn test_structural_blocks_cannot_be_deleted() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc.create_doc("T", Some("body\n")).await.unwrap();
    let blocks = svc.read_blocks(id.as_str()).await.unwrap();
    let note = blocks
        .iter()
        .find(|b| b.flavour == "affine:note")
        .unwrap()
        .id
        .clone();

    let pushes = server.push_count();
    let err = svc.delete_block(id.as_str(), &note).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Core(CoreError::StructuralProtection { .. })
    ));
    assert_eq!(server.push_count(), pushes);
    assert_eq!(svc.read_blocks(id.as_str()).await.unwrap().len(), blocks.len());
}

#[tokio::test]
async fn test_delete_block_is_pushed() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc.create_doc("T", Some("one\n\ntwo\n")).await.unwrap();
    let blocks = svc.read_blocks(id.as_str()).await.unwrap();
    let two = blocks
        .iter()
        .find(|b| b.text.as_deref() == Some("two"))
        .unwrap()
        .id
        .clone();

    let pushes = server.push_count();
    let removed = svc.delete_block(id.as_str(), &two).await.unwrap();
    assert_eq!(removed, vec![two.clone()]);
    assert_eq!(server.pushed_docs()[pushes..], [id.to_string(), WORKSPACE.to_string()]);

    assert_eq!(svc.read_markdown(id.as_str()).await.unwrap().markdown, "# T\n\none\n");
    let blocks = svc.read_blocks(id.as_str()).await.unwrap();
    assert!(blocks.iter().all(|b| b.id != two));
}

#[tokio::test]
async fn test_patch_that_only_deletes_is_pushed() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc.create_doc("T", Some("one\n\ntwo\n")).await.unwrap();

    let pushes = server.push_count();
    let outcome = svc.patch_markdown(id.as_str(), "two", "").await.unwrap();
    assert_eq!(outcome.removed.len(), 1);
    assert!(outcome.created.is_empty());
    assert!(server.push_count() > pushes);

    assert_eq!(svc.read_markdown(id.as_str()).await.unwrap().markdown, "# T\n\none\n");
}

#[tokio::test]
async fn test_invalid_input_fails_before_connecting() {
    let server = MemoryServer::new();
    let svc = service(&server);

    let input = BlockInput {
        checked: Some(true),
        ..BlockInput::new("paragraph").with_text("x")
    };
    let err = svc
        .append_block("doc", &input, &Placement::Default)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Core(CoreError::Validation(_))));
    assert_eq!(server.connect_count(), 0);
}

#[tokio::test]
async fn test_missing_doc() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let err = svc.read_markdown("nope").await.unwrap_err();
    assert!(matches!(err, ServiceError::DocNotFound(id) if id == "nope"));
    settle(&server).await;
    assert_eq!(server.open_channels(), 0);
}

#[tokio::test]
async fn test_rejected_client_version() {
    let server = MemoryServer::new();
    server.reject_client_version(affine_sync::config::DEFAULT_CLIENT_VERSION);
    let svc = service(&server);
    let err = svc.list_docs().await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Transport(TransportError::VersionMismatch { .. })
    ));
    assert_eq!(server.open_channels(), 0);
}

#[tokio::test]
async fn test_push_timeout_releases_channel() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let id = svc.create_doc("T", None).await.unwrap();

    server.stall(EVENT_PUSH_DOC_UPDATE);
    let err = svc
        .append_markdown(id.as_str(), "more\n")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Transport(TransportError::PushTimeout { .. })
    ));
    settle(&server).await;
    assert_eq!(server.open_channels(), 0);
}

#[tokio::test]
async fn test_title_and_delete_update_page_list() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let keep = svc.create_doc("Keep", None).await.unwrap();
    let drop = svc.create_doc("Drop", None).await.unwrap();

    svc.set_title(keep.as_str(), "Kept").await.unwrap();
    assert_eq!(svc.read_markdown(keep.as_str()).await.unwrap().title, "Kept");

    svc.delete_doc(drop.as_str()).await.unwrap();
    assert!(!server.has_doc(WORKSPACE, drop.as_str()));

    let pages = svc.list_docs().await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].title, "Kept");
}

#[tokio::test]
async fn test_folder_order_with_index_between() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let root = svc.create_folder(None, "root", None).await.unwrap();
    svc.create_folder(Some(&root), "first", Some("a0".into()))
        .await
        .unwrap();
    svc.create_folder(Some(&root), "last", Some("a1".into()))
        .await
        .unwrap();
    let middle = index_between(Some("a0"), Some("a1")).unwrap();
    svc.create_folder(Some(&root), "middle", Some(middle))
        .await
        .unwrap();

    let listing = svc.list_folders().await.unwrap();
    let names: Vec<(&str, usize)> = listing
        .iter()
        .map(|l| (l.entry.data.as_str(), l.depth))
        .collect();
    assert_eq!(
        names,
        [("root", 0), ("first", 1), ("middle", 1), ("last", 1)]
    );
}

#[tokio::test]
async fn test_folder_edits() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let outer = svc.create_folder(None, "outer", None).await.unwrap();
    let inner = svc.create_folder(Some(&outer), "inner", None).await.unwrap();
    svc.add_folder_link(Some(&inner), EntryType::Doc, "doc-1")
        .await
        .unwrap();

    let pushes = server.push_count();
    assert!(!svc.rename_folder(&outer, "outer").await.unwrap());
    assert!(matches!(
        svc.move_folder_entry(&outer, Some(&inner), None).await,
        Err(ServiceError::Core(CoreError::Validation(_)))
    ));
    assert_eq!(server.push_count(), pushes);

    let deleted = svc.delete_folder_entry(&outer).await.unwrap();
    assert_eq!(deleted.len(), 3);
    assert!(svc.list_folders().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_folder_batch_reports_per_item() {
    let server = MemoryServer::new();
    let svc = service(&server);
    let items = svc
        .batch_folders(vec![
            FolderOp::CreateFolder {
                parent_id: None,
                name: "a".into(),
                index: None,
            },
            FolderOp::Delete { id: "missing".into() },
            FolderOp::AddLink {
                parent_id: None,
                entry_type: EntryType::Collection,
                data: "c1".into(),
            },
        ])
        .await
        .unwrap();

    assert_eq!(
        items.iter().map(|i| i.ok).collect::<Vec<_>>(),
        [true, false, true]
    );
    assert!(items[1].error.is_some());
    assert_eq!(svc.list_folders().await.unwrap().len(), 2);
}
