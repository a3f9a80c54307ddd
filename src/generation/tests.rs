use super::*;
use futures::TryStreamExt;

struct SlowGenerator;

#[async_trait]
impl GenerationBackend for SlowGenerator {
    async fn generate(&self, _prompt: &str, _options: &GenerationOptions) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("too late".to_string())
    }

    fn model_name(&self) -> &str {
        "slow"
    }
}

struct EchoGenerator;

#[async_trait]
impl GenerationBackend for EchoGenerator {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<String> {
        Ok(format!("{}:{}", options.max_tokens, prompt))
    }

    fn model_name(&self) -> &str {
        "echo"
    }
}

#[test]
fn options_follow_config() {
    let config = GenerationConfig {
        max_tokens: 512,
        temperature: 0.2,
        top_p: 0.95,
        stop_sequences: vec!["###".to_string()],
        timeout_seconds: 30,
        ..GenerationConfig::default()
    };

    let options = GenerationOptions::from(&config);

    assert_eq!(options.max_tokens, 512);
    assert_eq!(options.temperature, 0.2);
    assert_eq!(options.top_p, 0.95);
    assert_eq!(options.stop_sequences, vec!["###".to_string()]);
    assert_eq!(options.timeout, Some(Duration::from_secs(30)));
}

#[test]
fn default_options() {
    let options = GenerationOptions::default();

    assert_eq!(options.max_tokens, 300);
    assert_eq!(options.temperature, 0.7);
    assert_eq!(options.top_p, 0.9);
    assert_eq!(options.repeat_penalty, 1.1);
    assert_eq!(options.stop_sequences, vec!["User Question:".to_string()]);
}

#[test]
fn builder_methods() {
    let options = GenerationOptions::default()
        .with_max_tokens(150)
        .with_temperature(0.2)
        .with_stop_sequences(vec!["END".to_string()]);

    assert_eq!(options.max_tokens, 150);
    assert_eq!(options.temperature, 0.2);
    assert_eq!(options.stop_sequences, vec!["END".to_string()]);
}

#[tokio::test]
async fn placeholder_answer() {
    let generator = PlaceholderGenerator::default();

    let answer = generator
        .generate("prompt", &GenerationOptions::default())
        .await
        .expect("placeholder never fails");

    assert_eq!(answer, PLACEHOLDER_ANSWER);
    assert_eq!(generator.model_name(), "placeholder");
}

#[tokio::test]
async fn default_stream_yields_whole_answer() {
    let generator = PlaceholderGenerator::with_answer("one piece");

    let fragments: Vec<String> = generator
        .generate_stream("prompt", &GenerationOptions::default())
        .await
        .expect("stream starts")
        .try_collect()
        .await
        .expect("stream completes");

    assert_eq!(fragments, vec!["one piece".to_string()]);
}

#[tokio::test]
async fn options_reach_backend() {
    let options = GenerationOptions::default().with_max_tokens(42);

    let answer = generate_with_timeout(&EchoGenerator, "hi", &options)
        .await
        .expect("echo succeeds");

    assert_eq!(answer, "42:hi");
}

#[tokio::test(start_paused = true)]
async fn timeout_is_generation_error() {
    let options = GenerationOptions {
        timeout: Some(Duration::from_secs(5)),
        ..GenerationOptions::default()
    };

    let result = generate_with_timeout(&SlowGenerator, "prompt", &options).await;

    assert!(matches!(result, Err(RagError::GenerationBackend(_))));
}
