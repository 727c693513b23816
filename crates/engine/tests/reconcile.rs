use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use propd_core::fingerprint::content_signature;
use propd_core::{
    Config, EventBus, Options, PropertyStore, Source, SourceContext, SourceCore, SourceError,
    SourceFactory,
};
use propd_engine::{IndexDocument, ManagerOptions, Reconciler, SourceManager};
use serde_json::{json, Value};

/// Publishes whatever document the test hands it, like an index source.
struct DocumentSource {
    core: SourceCore,
    document: Mutex<Value>,
}

impl DocumentSource {
    fn new(ctx: &SourceContext, document: Value) -> Arc<Self> {
        let options = json!({"bucket": "index-bucket", "path": "index.json"});
        Arc::new(Self {
            core: SourceCore::new("s3-index", "s3-index", options.as_object().cloned().unwrap(), ctx),
            document: Mutex::new(document),
        })
    }

    fn publish(&self, document: Value) {
        *self.document.lock().unwrap() = document;
    }
}

#[async_trait]
impl Source for DocumentSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn poll_once(&self) -> Result<(), SourceError> {
        let document = self.document.lock().unwrap().clone();
        let properties = document
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .map(PropertyStore::from)
            .unwrap_or_default();
        self.core
            .accept(content_signature(&document), properties, document);
        Ok(())
    }
}

/// Leaf source whose output is its own options.
struct EchoSource {
    core: SourceCore,
}

impl EchoSource {
    fn create(name: &str, options: &Options, ctx: &SourceContext) -> Result<Arc<dyn Source>, SourceError> {
        if options.contains_key("fail") {
            return Err(SourceError::InvalidOption {
                name: "fail".into(),
                reason: "requested".into(),
            });
        }
        Ok(Arc::new(Self {
            core: SourceCore::new(name, "s3", options.clone(), ctx),
        }))
    }
}

#[async_trait]
impl Source for EchoSource {
    fn core(&self) -> &SourceCore {
        &self.core
    }

    async fn poll_once(&self) -> Result<(), SourceError> {
        self.core.accept_content(self.core.options().clone());
        Ok(())
    }
}

struct Harness {
    ctx: SourceContext,
    manager: Arc<SourceManager>,
}

fn harness() -> Harness {
    let bus = Arc::new(EventBus::new());
    let ctx = SourceContext::new(Arc::clone(&bus), Arc::new(Config::default()));
    let manager = Arc::new(SourceManager::new(Arc::clone(&bus), ManagerOptions::default()));
    let factory = Arc::new(SourceFactory::new());
    factory.register("s3", EchoSource::create);
    Reconciler::new(&manager, factory, ctx.clone(), None).subscribe(&bus);
    Harness { ctx, manager }
}

fn svc(name: &str, path: &str) -> Value {
    json!({"name": name, "type": "s3", "parameters": {"bucket": "b", "path": path}})
}

#[tokio::test]
async fn index_adds_then_removes_sources() {
    let h = harness();
    let index = DocumentSource::new(&h.ctx, json!({"version": 1, "sources": [svc("svc1", "p")]}));
    h.manager.schedule(index.clone(), "", true, None);

    index.get().await;
    assert!(h.manager.get("svc1").is_some());
    assert!(h.manager.is_scheduled("svc1"));
    assert_eq!(h.manager.sources().len(), 1);

    index.publish(json!({"version": 1, "sources": []}));
    index.get().await;
    assert!(h.manager.get("svc1").is_none());
    assert!(!h.manager.is_scheduled("svc1"));
    assert!(h.manager.sources().is_empty());
}

#[tokio::test]
async fn unknown_type_is_skipped() {
    let h = harness();
    let index = DocumentSource::new(
        &h.ctx,
        json!({"sources": [
            {"name": "spooky", "type": "ghost", "parameters": {}},
            svc("svc1", "p"),
            {"name": "broken", "type": "s3", "parameters": {"fail": true}},
            svc("svc2", "q"),
        ]}),
    );
    h.manager.schedule(index.clone(), "", true, None);

    index.get().await;

    let names: Vec<String> = h.manager.sources().iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["svc1", "svc2"]);
    assert!(h.manager.is_scheduled("svc2"));
    assert!(h.manager.get("spooky").is_none());
}

#[tokio::test]
async fn malformed_entries_do_not_block_the_rest() {
    let h = harness();
    let index = DocumentSource::new(
        &h.ctx,
        json!({"sources": [
            svc("svc1", "p"),
            {"name": "typeless", "parameters": {}},
            {"name": "nulled", "type": "s3", "parameters": null},
            {"name": 7, "type": "s3", "parameters": {}},
            "not an object",
            svc("svc2", "q"),
        ]}),
    );
    h.manager.schedule(index.clone(), "", true, None);

    index.get().await;

    let names: Vec<String> = h.manager.sources().iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["svc1", "svc2"]);

    // A later document still reconciles normally.
    index.publish(json!({"sources": [svc("svc2", "q"), {"type": "s3"}]}));
    index.get().await;
    assert!(h.manager.get("svc1").is_none());
    assert!(h.manager.is_scheduled("svc2"));
}

#[tokio::test]
async fn skipped_entries_are_reported() {
    let h = harness();
    let index = DocumentSource::new(&h.ctx, json!({"sources": []}));
    h.manager.schedule(index.clone(), "", true, None);
    let factory = Arc::new(SourceFactory::new());
    factory.register("s3", EchoSource::create);
    let reconciler = Reconciler::new(&h.manager, factory, h.ctx.clone(), None);

    let document = IndexDocument::from_value(&json!({"sources": [
        {"name": "typeless"},
        {"parameters": {}},
        svc("svc1", "p"),
    ]}))
    .unwrap();
    let outcome = reconciler.reconcile("s3-index", &document).unwrap();

    assert_eq!(outcome.added, vec!["svc1"]);
    assert_eq!(outcome.skipped, vec!["typeless", "#1"]);
}

#[tokio::test]
async fn entry_named_like_the_index_is_skipped() {
    let h = harness();
    let index = DocumentSource::new(&h.ctx, json!({"sources": [svc("s3-index", "p"), svc("svc1", "p")]}));
    let job = h.manager.schedule(index.clone(), "", true, None);

    index.get().await;
    assert!(h.manager.is_index("s3-index"));
    assert_eq!(h.manager.get("s3-index").unwrap().source_type(), "s3-index");
    assert!(h.manager.get_job(index.as_ref()).is_some_and(|j| j.id == job.id));
    assert_eq!(h.manager.scheduler().jobs().len(), 2);

    // The index keeps driving reconciliation afterwards.
    index.publish(json!({"sources": [svc("s3-index", "p"), svc("svc2", "q")]}));
    index.get().await;
    let names: Vec<String> = h.manager.sources().iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["svc2"]);
}

#[tokio::test]
async fn entry_named_like_a_bootstrap_source_is_skipped() {
    let h = harness();
    let tags = EchoSource::create("ec2-tags", &Options::new(), &h.ctx).unwrap();
    let bootstrap_identity = tags.identity().to_string();
    h.manager.schedule(tags, "instance:tags", false, None);

    let index = DocumentSource::new(&h.ctx, json!({"sources": [svc("ec2-tags", "p")]}));
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;
    index.publish(json!({"version": 2, "sources": [svc("ec2-tags", "p")]}));
    index.get().await;

    let registered = h.manager.registration("ec2-tags").unwrap();
    assert_eq!(registered.source.identity(), bootstrap_identity);
    assert_eq!(registered.namespace, "instance:tags");
    assert_eq!(h.manager.sources().len(), 1);
}

#[tokio::test]
async fn duplicate_names_keep_the_first_entry() {
    let h = harness();
    let index = DocumentSource::new(
        &h.ctx,
        json!({"sources": [svc("svc1", "first"), svc("svc1", "second")]}),
    );
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;

    let svc1 = h.manager.get("svc1").unwrap();
    assert_eq!(svc1.core().options()["path"], json!("first"));
    assert_eq!(h.manager.sources().len(), 1);

    // Re-publishing the same duplicate list causes no churn.
    let identity = svc1.identity().to_string();
    index.publish(json!({"version": 2, "sources": [svc("svc1", "first"), svc("svc1", "second")]}));
    index.get().await;
    assert_eq!(h.manager.get("svc1").unwrap().identity(), identity);
}

#[tokio::test]
async fn unchanged_document_does_no_work() {
    let h = harness();
    let document = json!({"sources": [svc("svc1", "p")]});
    let index = DocumentSource::new(&h.ctx, document.clone());
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;

    // Drop the source behind the reconciler's back; an identical document
    // must not bring it back.
    let svc1 = h.manager.get("svc1").unwrap();
    h.manager.unschedule(svc1.as_ref());
    index.publish(document);
    index.get().await;

    assert!(h.manager.get("svc1").is_none());
}

#[tokio::test]
async fn changed_parameters_replace_the_source() {
    let h = harness();
    let index = DocumentSource::new(&h.ctx, json!({"sources": [svc("svc1", "old")]}));
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;
    let before = h.manager.get("svc1").unwrap().identity().to_string();

    index.publish(json!({"sources": [svc("svc1", "new")]}));
    index.get().await;

    let after = h.manager.get("svc1").unwrap();
    assert_ne!(after.identity(), before);
    assert_eq!(after.core().options()["path"], json!("new"));
    assert!(h.manager.is_scheduled("svc1"));
}

#[tokio::test]
async fn s3_entries_inherit_index_bucket() {
    let h = harness();
    let index = DocumentSource::new(
        &h.ctx,
        json!({"sources": [{"name": "svc1", "type": "s3", "parameters": {"path": "p"}}]}),
    );
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;

    let svc1 = h.manager.get("svc1").unwrap();
    assert_eq!(svc1.core().options()["bucket"], json!("index-bucket"));
}

#[tokio::test]
async fn definitions_interpolate_against_current_tree() {
    let h = harness();
    let meta = EchoSource::create("meta", json!({"vpc-id": "vpc-9"}).as_object().unwrap(), &h.ctx).unwrap();
    h.manager.register(Arc::clone(&meta), "instance", false);
    meta.get().await;

    let index = DocumentSource::new(
        &h.ctx,
        json!({"sources": [svc("svc1", "{{ instance:vpc-id }}/props.json")]}),
    );
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;

    let svc1 = h.manager.get("svc1").unwrap();
    assert_eq!(svc1.core().options()["path"], json!("vpc-9/props.json"));
}

#[tokio::test]
async fn bootstrap_sources_survive_reconciliation() {
    let h = harness();
    let metadata = EchoSource::create("ec2-metadata", &Options::new(), &h.ctx).unwrap();
    h.manager.schedule(metadata, "instance", false, None);

    let index = DocumentSource::new(&h.ctx, json!({"sources": []}));
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;

    assert!(h.manager.is_scheduled("ec2-metadata"));
}

#[tokio::test]
async fn index_properties_join_the_tree() {
    let h = harness();
    let index = DocumentSource::new(
        &h.ctx,
        json!({"properties": {"global": {"flag": true}}, "sources": [svc("svc1", "p")]}),
    );
    h.manager.schedule(index.clone(), "", true, None);
    index.get().await;
    h.manager.get("svc1").unwrap().get().await;

    let tree = Value::Object(h.manager.properties());
    assert_eq!(tree["global"], json!({"flag": true}));
    assert_eq!(tree["path"], json!("p"));
}
