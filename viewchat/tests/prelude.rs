use viewchat::prelude::*;

#[test]
fn funding_view_schema_is_available_from_the_prelude() {
    let schema = SchemaContext::new(SchemaDescriptor::funding_view()).expect("schema");
    assert_eq!(schema.view(), "funding_view");
    assert!(schema.render().contains("funding_status"));
}

#[test]
fn default_config_validates() {
    PipelineConfig::default().validate().expect("defaults");
}

#[cfg(feature = "openai")]
#[test]
fn openai_client_is_reexported() {
    let client = OpenAiCompatibleClient::builder()
        .base_url("https://api.openai.com/v1")
        .expect("base url")
        .default_model("gpt-4o-mini")
        .build();
    assert!(client.is_ok());
}
