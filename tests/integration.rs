//! End-to-end rendering through the public API only.

use qute_rs::{Engine, UnresolvedPolicy};
use serde_json::json;

fn engine() -> Engine {
    // RUST_LOG=qute_rs=debug surfaces parse/render traces
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .try_init();
    Engine::builder().add_defaults().build()
}

#[tokio::test]
async fn page_layout_with_overrides() {
    let engine = engine();
    engine.put_template(
        "layout",
        engine
            .parse_named(
                "layout",
                "<title>{#insert title}Untitled{/}</title><main>{#insert}{/}</main>",
            )
            .unwrap(),
    );
    let page = engine
        .parse(
            "{#include layout}{#title}{site.name}{/title}\
             {#for post in posts}<p>{post}</p>{#else}<p>nothing yet</p>{/for}{/include}",
        )
        .unwrap();

    let html = page
        .render(json!({
            "site": { "name": "My Blog" },
            "posts": ["hello", "world"],
        }))
        .await
        .unwrap();
    assert_eq!(
        html,
        "<title>My Blog</title><main><p>hello</p><p>world</p></main>"
    );

    let empty = page
        .render(json!({ "site": { "name": "My Blog" }, "posts": [] }))
        .await
        .unwrap();
    assert_eq!(
        empty,
        "<title>My Blog</title><main><p>nothing yet</p></main>"
    );
}

#[tokio::test]
async fn concurrent_renders_share_one_template() {
    let engine = engine();
    let template = engine.parse("{#for i in n}{i},{/for}").unwrap();

    let mut handles = Vec::new();
    for n in 1..=4u64 {
        let template = template.clone();
        handles.push(tokio::spawn(async move {
            template.render(json!({ "n": n })).await
        }));
    }
    let mut outputs = Vec::new();
    for handle in handles {
        outputs.push(handle.await.unwrap().unwrap());
    }
    assert_eq!(outputs, vec!["1,", "1,2,", "1,2,3,", "1,2,3,4,"]);
}

#[tokio::test]
async fn keep_policy_preserves_unresolved_text() {
    let engine = Engine::builder()
        .add_defaults()
        .unresolved(UnresolvedPolicy::Keep)
        .build();
    let template = engine.parse("Dear {user.name},").unwrap();
    assert_eq!(
        template.render(json!({})).await.unwrap(),
        "Dear {user.name},"
    );
}
