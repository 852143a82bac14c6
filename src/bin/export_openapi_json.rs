use lms_server::server::ApiDoc;
use utoipa::OpenApi;

fn main() {
    let path = std::env::args()
        .nth(1)
        .unwrap_or("openapi.json".to_string());
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .expect("serialize OpenAPI document");
    std::fs::write(path, json).unwrap();
}
