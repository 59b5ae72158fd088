//! End-to-end export/import tests against the in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use blogport::service::{ExportRequest, TaskService, UploadedFile};
use blogport::workflow::{
    export, import, run_task, CancelFlag, Collaborators, TaskContext, WorkflowSettings,
};
use blogport_core::archive::Archive;
use blogport_core::document::Node;
use blogport_core::entries::Dialect;
use blogport_core::frontmatter::PostStatus;
use blogport_core::images::{media_url, storage_key_from_src};
use blogport_core::models::{NewPost, Post, PostFilter, TaskKind, TaskProgress, TaskStatus};
use blogport_core::store::memory::{
    InMemoryBlobStore, InMemoryCheckpointStore, InMemoryKvStore, InMemoryPostStore,
};
use blogport_core::store::{BlobStore, Checkpoint, CheckpointStore, PostStore, TaskRecord};

// ─── Test instance ────────────────────────────────────────────────────────

struct Instance {
    posts: Arc<InMemoryPostStore>,
    blobs: Arc<InMemoryBlobStore>,
    journal: Arc<InMemoryCheckpointStore>,
    collab: Collaborators,
    service: TaskService,
}

fn settings() -> WorkflowSettings {
    WorkflowSettings {
        progress_ttl: Duration::from_secs(3600),
        export_retention: Duration::from_secs(3600),
        unit_timeout: Duration::from_secs(10),
    }
}

fn instance() -> Instance {
    instance_with(settings())
}

fn instance_with(settings: WorkflowSettings) -> Instance {
    let posts = Arc::new(InMemoryPostStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let journal = Arc::new(InMemoryCheckpointStore::new());
    let collab = Collaborators {
        posts: posts.clone(),
        blobs: blobs.clone(),
        kv: Arc::new(InMemoryKvStore::new()),
        journal: journal.clone(),
    };
    let service = TaskService::new(collab.clone(), settings);
    Instance {
        posts,
        blobs,
        journal,
        collab,
        service,
    }
}

async fn seed_post(inst: &Instance, title: &str, slug: &str, tags: &[&str], content: Node) {
    let mut tag_ids = Vec::new();
    for name in tags {
        tag_ids.push(inst.posts.upsert_tag(name).await.unwrap().id);
    }
    inst.posts
        .insert_post(&NewPost {
            title: title.to_string(),
            slug: slug.to_string(),
            summary: Some(format!("About {}", title)),
            status: PostStatus::Published,
            content,
            read_time_in_minutes: 3,
            published_at: Some(Utc::now()),
            created_at: None,
            updated_at: None,
            tag_ids,
        })
        .await
        .unwrap();
}

/// Two posts, the first with a stored image.
async fn seed_blog(inst: &Instance) {
    inst.blobs
        .put("images/cover.png", b"cover-bytes".to_vec(), "image/png")
        .await
        .unwrap();
    seed_post(
        inst,
        "Hello World",
        "hello-world",
        &["Rust", "Intro"],
        Node::doc(vec![
            Node::heading(2, vec![Node::text("Welcome")]),
            Node::paragraph(vec![Node::text("First post.")]),
            Node::image(media_url("images/cover.png"), Some("Cover")),
        ]),
    )
    .await;
    seed_post(
        inst,
        "Second Thoughts",
        "second-thoughts",
        &["rust"],
        Node::doc(vec![Node::paragraph(vec![Node::text("More words.")])]),
    )
    .await;
}

async fn wait(inst: &Instance, kind: TaskKind, task_id: &str) -> TaskProgress {
    tokio::time::timeout(
        Duration::from_secs(10),
        inst.service
            .wait(kind, task_id, Duration::from_millis(10), |_| {}),
    )
    .await
    .expect("task did not finish in time")
    .unwrap()
}

async fn export_archive(inst: &Instance) -> Vec<u8> {
    let task_id = inst
        .service
        .start_export(ExportRequest::default())
        .await
        .unwrap();
    let done = wait(inst, TaskKind::Export, &task_id).await;
    assert_eq!(done.status, TaskStatus::Completed, "{:?}", done);
    inst.service
        .download_export(&task_id)
        .await
        .unwrap()
        .expect("archive retained")
}

async fn import_files(inst: &Instance, files: Vec<UploadedFile>) -> TaskProgress {
    let started = inst.service.start_import(files).await.unwrap();
    wait(inst, TaskKind::Import, &started.task_id).await
}

fn md_upload(name: &str, text: &str) -> UploadedFile {
    UploadedFile {
        name: name.into(),
        bytes: text.as_bytes().to_vec(),
    }
}

fn zip_upload(bytes: Vec<u8>) -> Vec<UploadedFile> {
    vec![UploadedFile {
        name: "blog.zip".into(),
        bytes,
    }]
}

async fn post(inst: &Instance, slug: &str) -> Post {
    inst.posts
        .get_post_by_slug(slug)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("post {} missing", slug))
}

fn image_srcs(tree: &Node) -> Vec<String> {
    let mut srcs = Vec::new();
    tree.walk(&mut |node| {
        if let Node::Image { attrs } = node {
            srcs.push(attrs.src.clone());
        }
    });
    srcs
}

// ─── Export ─────────────────────────────────────────────────────────

#[tokio::test]
async fn export_writes_native_archive() {
    let inst = instance();
    seed_blog(&inst).await;

    let archive = Archive::from_bytes(&export_archive(&inst).await).unwrap();

    assert!(archive.contains("manifest.json"));
    assert!(archive.contains("tags.json"));
    assert!(archive.contains("posts/hello-world/index.md"));
    assert!(archive.contains("posts/hello-world/content.json"));
    assert!(archive.contains("posts/second-thoughts/index.md"));
    assert_eq!(
        archive.get("posts/hello-world/images/cover.png"),
        Some(&b"cover-bytes"[..])
    );

    let index = archive.read_text("posts/hello-world/index.md").unwrap();
    assert!(index.starts_with("---\n"));
    assert!(index.contains("title: Hello World"));
    assert!(index.contains("](images/cover.png)"), "{}", index);

    let manifest: serde_json::Value = archive.read_json("manifest.json").unwrap();
    assert_eq!(manifest["postCount"], 2);
}

#[tokio::test]
async fn export_filter_by_status() {
    let inst = instance();
    seed_blog(&inst).await;
    inst.posts
        .insert_post(&NewPost {
            title: "Draft".into(),
            slug: "draft".into(),
            summary: None,
            status: PostStatus::Draft,
            content: Node::doc(vec![]),
            read_time_in_minutes: 1,
            published_at: None,
            created_at: None,
            updated_at: None,
            tag_ids: vec![],
        })
        .await
        .unwrap();

    let task_id = inst
        .service
        .start_export(PostFilter {
            post_ids: None,
            status: Some(PostStatus::Draft),
        })
        .await
        .unwrap();
    wait(&inst, TaskKind::Export, &task_id).await;
    let bytes = inst.service.download_export(&task_id).await.unwrap().unwrap();
    let archive = Archive::from_bytes(&bytes).unwrap();
    assert!(archive.contains("posts/draft/index.md"));
    assert!(!archive.contains("posts/hello-world/index.md"));
}

// ─── Import ─────────────────────────────────────────────────────────

#[tokio::test]
async fn export_then_import_into_fresh_blog() {
    let source = instance();
    seed_blog(&source).await;
    let bytes = export_archive(&source).await;

    let target = instance();
    let started = target.service.start_import(zip_upload(bytes)).await.unwrap();
    assert_eq!(started.mode, Dialect::Native);
    let done = wait(&target, TaskKind::Import, &started.task_id).await;

    assert_eq!(done.status, TaskStatus::Completed, "{:?}", done);
    assert_eq!(done.total, 2);
    assert_eq!(done.completed, 2);
    let report = done.report.as_ref().expect("report");
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.failed.is_empty());
    assert_eq!(done.summary(), "2 succeeded, 0 failed, 0 warnings");

    let original = post(&source, "hello-world").await;
    let imported = post(&target, "hello-world").await;
    assert_eq!(imported.title, original.title);
    assert_eq!(imported.summary, original.summary);
    assert_eq!(imported.read_time_in_minutes, 3);
    assert_eq!(imported.tags, vec!["Rust", "Intro"]);
    assert_eq!(imported.content.plain_text(), original.content.plain_text());

    // The image was relocated into the target's blob store.
    let srcs = image_srcs(&imported.content);
    assert_eq!(srcs.len(), 1);
    let key = storage_key_from_src(&srcs[0]).unwrap();
    assert!(key.starts_with("images/") && key.ends_with("-cover.png"), "{}", key);
    assert_eq!(
        target.blobs.get(&key).await.unwrap().as_deref(),
        Some(&b"cover-bytes"[..])
    );

    // The staged source archive is gone.
    assert!(target.blobs.keys().iter().all(|k| !k.starts_with("imports/")));
}

#[tokio::test]
async fn reimport_under_new_slug_preserves_the_post() {
    let inst = instance();
    seed_blog(&inst).await;
    let bytes = export_archive(&inst).await;

    // Same archive, first post renamed, second post dropped.
    let mut entries = Archive::from_bytes(&bytes).unwrap().into_entries();
    entries.retain(|path, _| !path.starts_with("posts/second-thoughts/"));
    let index = entries.get_mut("posts/hello-world/index.md").unwrap();
    let text = String::from_utf8(index.clone()).unwrap();
    assert!(text.contains("slug: hello-world\n"));
    *index = text
        .replace("slug: hello-world\n", "slug: hello-world-copy\n")
        .into_bytes();
    let renamed = Archive::from_entries(entries).unwrap().to_bytes().unwrap();

    let done = import_files(&inst, zip_upload(renamed)).await;
    assert_eq!(done.summary(), "1 succeeded, 0 failed, 0 warnings", "{:?}", done);

    let original = post(&inst, "hello-world").await;
    let copy = post(&inst, "hello-world-copy").await;
    assert_ne!(copy.id, original.id);
    assert_eq!(copy.title, original.title);
    assert_eq!(copy.summary, original.summary);
    assert_eq!(copy.status, original.status);
    assert_eq!(copy.read_time_in_minutes, original.read_time_in_minutes);
    assert_eq!(copy.content, original.content);
    assert_eq!(copy.tags, original.tags);
    assert_eq!(inst.posts.list_tags().await.unwrap().len(), 2);
}

#[tokio::test]
async fn reimport_into_same_blog_skips_every_slug() {
    let inst = instance();
    seed_blog(&inst).await;
    let bytes = export_archive(&inst).await;

    let done = import_files(&inst, zip_upload(bytes)).await;

    assert_eq!(done.status, TaskStatus::Completed);
    let report = done.report.unwrap();
    assert!(report.succeeded.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings.iter().all(|w| w.contains("already exists")));
    assert_eq!(inst.posts.post_count(), 2);
}

#[tokio::test]
async fn tags_are_reused_case_insensitively() {
    let inst = instance();
    inst.posts.upsert_tag("Rust").await.unwrap();

    let md = "---\ntitle: Borrowing\ntags: [rust, RUST, Ownership]\n---\n\nBody.\n";
    let done = import_files(
        &inst,
        vec![UploadedFile {
            name: "borrowing.md".into(),
            bytes: md.as_bytes().to_vec(),
        }],
    )
    .await;
    assert_eq!(done.summary(), "1 succeeded, 0 failed, 0 warnings");

    let tags = inst.posts.list_tags().await.unwrap();
    let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names.len(), 2, "{:?}", names);
    assert!(names.contains(&"Rust"));
    assert!(names.contains(&"Ownership"));
    assert_eq!(post(&inst, "borrowing").await.tags, vec!["Rust", "Ownership"]);
}

#[tokio::test]
async fn markdown_files_import_with_relative_images() {
    let inst = instance();
    let files = vec![
        UploadedFile {
            name: "blog/first.md".into(),
            bytes: b"+++\ntitle = \"From Hugo\"\ndate = 2023-04-01\n+++\n\nSee ![pic](img/pic.jpg)\n"
                .to_vec(),
        },
        UploadedFile {
            name: "blog/img/pic.jpg".into(),
            bytes: b"jpg".to_vec(),
        },
        UploadedFile {
            name: "blog/untitled.md".into(),
            bytes: b"# Heading Title\n\n![gone](missing.png)\n".to_vec(),
        },
    ];
    let started = inst.service.start_import(files).await.unwrap();
    assert_eq!(started.mode, Dialect::Markdown);
    let done = wait(&inst, TaskKind::Import, &started.task_id).await;

    let report = done.report.unwrap();
    assert_eq!(report.succeeded.len(), 2, "{:?}", report);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("missing.png"));

    let hugo = post(&inst, "from-hugo").await;
    assert!(hugo.published_at.is_some());
    let srcs = image_srcs(&hugo.content);
    let key = storage_key_from_src(&srcs[0]).unwrap();
    assert_eq!(inst.blobs.get(&key).await.unwrap().as_deref(), Some(&b"jpg"[..]));

    post(&inst, "heading-title").await;
}

#[tokio::test]
async fn shared_tag_is_stored_once_for_two_posts() {
    let inst = instance();
    let done = import_files(
        &inst,
        vec![
            md_upload("one.md", "---\ntitle: One\ntags: [shared-tag]\n---\n\nFirst.\n"),
            md_upload("two.md", "---\ntitle: Two\ntags: shared-tag\n---\n\nSecond.\n"),
        ],
    )
    .await;
    assert_eq!(done.summary(), "2 succeeded, 0 failed, 0 warnings", "{:?}", done);

    let tags = inst.posts.list_tags().await.unwrap();
    assert_eq!(tags.len(), 1, "{:?}", tags);
    assert_eq!(tags[0].name, "shared-tag");
    assert_eq!(post(&inst, "one").await.tags, vec!["shared-tag"]);
    assert_eq!(post(&inst, "two").await.tags, vec!["shared-tag"]);
}

#[tokio::test]
async fn blank_front_matter_title_falls_back_to_heading() {
    let inst = instance();
    let done = import_files(
        &inst,
        vec![
            md_upload("post.md", "---\ntitle: \"\"\n---\n# Real Title\n\nBody.\n"),
            md_upload("other.md", "---\ntitle: null\ntags: [x]\n---\n# Other Title\n"),
        ],
    )
    .await;

    assert_eq!(done.total, 2);
    assert_eq!(done.summary(), "2 succeeded, 0 failed, 0 warnings", "{:?}", done);
    assert_eq!(post(&inst, "real-title").await.title, "Real Title");
    assert_eq!(post(&inst, "other-title").await.tags, vec!["x"]);
}

#[tokio::test]
async fn zero_entry_archive_completes_with_warning() {
    let inst = instance();
    let done = import_files(
        &inst,
        vec![UploadedFile {
            name: "notes.txt".into(),
            bytes: b"not a post".to_vec(),
        }],
    )
    .await;

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.total, 0);
    assert!(!done.warnings.is_empty());
    assert_eq!(inst.posts.post_count(), 0);
}

#[tokio::test]
async fn unreadable_zip_is_rejected_before_a_task_exists() {
    let inst = instance();
    let err = inst
        .service
        .start_import(zip_upload(b"definitely not a zip".to_vec()))
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("blog.zip"));
    assert!(inst.journal.unfinished_tasks().await.unwrap().is_empty());
}

// ─── Durability ─────────────────────────────────────────────────────

/// Stage `bytes` as an import archive and record the task, without
/// starting it.
async fn stage_import(inst: &Instance, task_id: &str, bytes: Vec<u8>) -> TaskRecord {
    let archive_key = import::archive_key(task_id);
    inst.blobs
        .put(&archive_key, bytes, "application/zip")
        .await
        .unwrap();
    let record = TaskRecord {
        id: task_id.to_string(),
        kind: TaskKind::Import,
        params: serde_json::to_value(import::ImportParams {
            archive_key,
            mode: Dialect::Native,
        })
        .unwrap(),
        created_at: Utc::now(),
        finished_at: None,
    };
    inst.journal.create_task(&record).await.unwrap();
    record
}

fn context(inst: &Instance, task_id: &str, cancel: CancelFlag) -> TaskContext {
    TaskContext::new(task_id, TaskKind::Import, inst.collab.clone(), settings(), cancel)
}

async fn progress(inst: &Instance, task_id: &str) -> TaskProgress {
    inst.service
        .import_progress(task_id)
        .await
        .unwrap()
        .expect("progress record")
}

#[tokio::test]
async fn replay_after_lost_finalize_reproduces_the_report() {
    let source = instance();
    seed_blog(&source).await;
    let bytes = export_archive(&source).await;

    let inst = instance();
    let record = stage_import(&inst, "t1", bytes.clone()).await;
    run_task(context(&inst, "t1", CancelFlag::default()), record.clone()).await;
    let first = progress(&inst, "t1").await;
    assert_eq!(first.status, TaskStatus::Completed);
    let journalled = inst.journal.load("t1").await.unwrap().len();

    // Crash after the last unit but before finalize was journalled.
    inst.journal.truncate("t1", 1);
    inst.blobs
        .put(&import::archive_key("t1"), bytes, "application/zip")
        .await
        .unwrap();
    run_task(context(&inst, "t1", CancelFlag::default()), record).await;

    let second = progress(&inst, "t1").await;
    assert_eq!(second.status, TaskStatus::Completed);
    assert_eq!(second.report, first.report);
    assert_eq!(inst.posts.post_count(), 2);
    assert_eq!(inst.journal.load("t1").await.unwrap().len(), journalled);
    assert!(inst.blobs.get(&import::archive_key("t1")).await.unwrap().is_none());
}

#[tokio::test]
async fn rerun_unit_after_lost_checkpoint_never_duplicates() {
    let source = instance();
    seed_blog(&source).await;
    let bytes = export_archive(&source).await;

    let inst = instance();
    let record = stage_import(&inst, "t2", bytes.clone()).await;
    run_task(context(&inst, "t2", CancelFlag::default()), record.clone()).await;

    // The last unit's insert happened but its checkpoint was lost.
    inst.journal.truncate("t2", 2);
    inst.blobs
        .put(&import::archive_key("t2"), bytes, "application/zip")
        .await
        .unwrap();
    run_task(context(&inst, "t2", CancelFlag::default()), record).await;

    let done = progress(&inst, "t2").await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(inst.posts.post_count(), 2);
    let report = done.report.unwrap();
    assert_eq!(report.succeeded.len(), 1);
    assert!(report.warnings.iter().any(|w| w.contains("already exists")));
}

#[tokio::test]
async fn unfinished_tasks_are_resumed() {
    let source = instance();
    seed_blog(&source).await;
    let bytes = export_archive(&source).await;

    let inst = instance();
    stage_import(&inst, "t3", bytes).await;

    let resumed = inst.service.resume_unfinished().await.unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].id, "t3");

    let done = wait(&inst, TaskKind::Import, "t3").await;
    assert_eq!(done.summary(), "2 succeeded, 0 failed, 0 warnings");

    // The journal is closed right after the terminal progress write.
    for _ in 0..100 {
        if inst.journal.unfinished_tasks().await.unwrap().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task journal was never closed");
}

#[tokio::test]
async fn cancelled_task_fails_without_importing() {
    let source = instance();
    seed_blog(&source).await;
    let bytes = export_archive(&source).await;

    let inst = instance();
    let record = stage_import(&inst, "t4", bytes).await;
    let cancel = CancelFlag::default();
    cancel.cancel();
    run_task(context(&inst, "t4", cancel), record).await;

    let done = progress(&inst, "t4").await;
    assert_eq!(done.status, TaskStatus::Failed);
    assert_eq!(done.warnings.last().map(String::as_str), Some("cancelled"));
    assert_eq!(inst.posts.post_count(), 0);
}

#[tokio::test]
async fn cancel_unknown_task_is_refused() {
    let inst = instance();
    assert!(!inst.service.cancel("nope"));
}

// ─── Export retention ───────────────────────────────────────────────

fn short_retention(retention: Duration) -> WorkflowSettings {
    WorkflowSettings {
        export_retention: retention,
        ..settings()
    }
}

async fn wait_for_closed_journal(inst: &Instance, task_id: &str) {
    for _ in 0..300 {
        let open = inst.journal.unfinished_tasks().await.unwrap();
        if open.iter().all(|t| t.id != task_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} journal was never closed", task_id);
}

fn step_names(journal: &[Checkpoint]) -> Vec<&str> {
    journal.iter().map(|c| c.step.as_str()).collect()
}

#[tokio::test]
async fn expired_export_archive_is_deleted() {
    let inst = instance_with(short_retention(Duration::from_millis(50)));
    seed_blog(&inst).await;

    let task_id = inst
        .service
        .start_export(ExportRequest::default())
        .await
        .unwrap();
    let done = wait(&inst, TaskKind::Export, &task_id).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.download_key.as_deref(), Some(export::archive_key(&task_id).as_str()));

    wait_for_closed_journal(&inst, &task_id).await;

    assert!(inst
        .blobs
        .get(&export::archive_key(&task_id))
        .await
        .unwrap()
        .is_none());
    assert!(inst.service.download_export(&task_id).await.unwrap().is_none());
    let journal = inst.journal.load(&task_id).await.unwrap();
    assert_eq!(step_names(&journal), vec!["build-archive", "cleanup-delay", "cleanup"]);
}

#[tokio::test]
async fn cleanup_resumes_mid_sleep_without_rebuilding() {
    let settings = short_retention(Duration::from_millis(400));
    let inst = instance_with(settings);
    seed_blog(&inst).await;

    let record = TaskRecord {
        id: "e1".to_string(),
        kind: TaskKind::Export,
        params: serde_json::to_value(ExportRequest::default()).unwrap(),
        created_at: Utc::now(),
        finished_at: None,
    };
    inst.journal.create_task(&record).await.unwrap();
    let ctx = TaskContext::new(
        "e1",
        TaskKind::Export,
        inst.collab.clone(),
        settings,
        CancelFlag::default(),
    );
    let first_run = tokio::spawn(run_task(ctx, record));

    // Let it publish the archive and start sleeping, then kill it.
    for _ in 0..200 {
        if inst.journal.load("e1").await.unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    first_run.abort();
    let _ = first_run.await;

    let before = inst.journal.load("e1").await.unwrap();
    assert_eq!(step_names(&before), vec!["build-archive", "cleanup-delay"]);
    assert!(inst.service.download_export("e1").await.unwrap().is_some());

    // A post added after the archive was built must not show up: the
    // resumed run replays build-archive instead of rerunning it.
    seed_post(&inst, "Late", "late", &[], Node::doc(vec![])).await;

    let resumed = inst.service.resume_unfinished().await.unwrap();
    assert_eq!(resumed.len(), 1);
    wait_for_closed_journal(&inst, "e1").await;

    let after = inst.journal.load("e1").await.unwrap();
    assert_eq!(step_names(&after), vec!["build-archive", "cleanup-delay", "cleanup"]);
    assert_eq!(after[..2], before[..]);
    assert!(inst.blobs.get(&export::archive_key("e1")).await.unwrap().is_none());
    let progress = inst.service.export_progress("e1").await.unwrap().unwrap();
    assert_eq!(progress.total, 2);
}
