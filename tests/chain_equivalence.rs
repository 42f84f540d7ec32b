//! Server side chains and client side stage-by-stage execution must produce
//! the same final artifacts.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use gen_relay::config::ClientConfig;
use gen_relay::decoder::Artifacts;
use gen_relay::mock_service::MockGenerationService;
use gen_relay::orchestrator::Orchestrator;
use gen_relay::params::ImageParams;
use gen_relay::wire::generation::{
    Artifact, ArtifactPayload, ArtifactType, BorderMode, ColorMatchMode, Prompt, Request, RpcError, Tensor,
    TransformParameters,
};
use gen_relay::{Client, PromptSet};

/// Deterministic stage output: the engine, the operation and every input
/// artifact's bytes, folded into a tensor or an image as requested
fn synthetic_stage(request: &Request) -> Result<Vec<Artifact>, RpcError> {
    let mut data = request.engine_id.clone().into_bytes();
    let op = request.transform.as_ref().map_or("generate", TransformParameters::op_name);
    data.extend_from_slice(op.as_bytes());
    for artifact in request.prompt.iter().filter_map(|p| p.artifact()) {
        data.push(b'|');
        match &artifact.payload {
            ArtifactPayload::Binary(bytes) => data.extend_from_slice(bytes),
            ArtifactPayload::Tensor(tensor) => data.extend_from_slice(&tensor.data),
            _ => {}
        }
    }
    let data = Bytes::from(data);

    Ok(match request.requested_type {
        Some(ArtifactType::Tensor) => vec![Artifact::tensor(Tensor {
            dtype: "float32".into(),
            shape: vec![data.len() as u64],
            data,
        })],
        _ => vec![
            Artifact::binary(ArtifactType::Image, "image/png", data.clone()),
            Artifact::binary(ArtifactType::Mask, "image/png", Bytes::from(format!("mask:{}", data.len()))),
        ],
    })
}

/// Artifact a stage hands on when the chain runs client side
fn passed_on(request: &Request) -> Artifact {
    let mut artifacts = Artifacts::new();
    for artifact in synthetic_stage(request).unwrap() {
        artifacts.push(artifact);
    }
    artifacts.primary_artifact().unwrap()
}

struct Pair {
    chained: Client,
    unchained: Client,
    chained_service: Arc<MockGenerationService>,
    unchained_service: Arc<MockGenerationService>,
}

fn pair() -> Pair {
    let config = ClientConfig::default();
    let build = |no_chains: bool| {
        let service = Arc::new(MockGenerationService::new().with_handler(Box::new(synthetic_stage)));
        let client = Client::new(service.clone(), &config)
            .with_orchestrator(Orchestrator::new(&config.retry).with_sleeper(Arc::new(|_: Duration| {})))
            .with_debug_no_chains(no_chains);
        (client, service)
    };
    let (chained, chained_service) = build(false);
    let (unchained, unchained_service) = build(true);
    Pair { chained, unchained, chained_service, unchained_service }
}

/// Each client side stage must be sent the request built for that stage with
/// the previous stage's primary artifact appended after its own prompts
fn assert_stage_inputs(p: &Pair) {
    let chains = p.chained_service.chains();
    assert_eq!(chains.len(), 1);
    let stages = chains[0].execution_path().unwrap();
    let sent = p.unchained_service.requests();
    assert_eq!(sent.len(), stages.len());

    for (index, stage) in stages.iter().enumerate() {
        let mut expected = stage.request.clone();
        if index > 0 {
            expected.prompt.push(Prompt::Artifact(passed_on(&sent[index - 1])));
        }
        assert_eq!(sent[index], expected, "stage {}", stage.id);
    }
}

fn resample(depth_warp: f32) -> TransformParameters {
    TransformParameters::Resample {
        border_mode: BorderMode::Reflect,
        transform: vec![1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        prev_transform: None,
        depth_warp,
        export_mask: true,
    }
}

fn color_adjust() -> TransformParameters {
    TransformParameters::ColorAdjust {
        brightness: 1.1,
        contrast: 1.0,
        hue: 0.0,
        saturation: 0.9,
        lightness: 0.0,
        match_mode: Some(ColorMatchMode::Lab),
        noise_amount: 0.02,
        noise_seed: 7,
    }
}

fn depth_calc() -> TransformParameters {
    TransformParameters::DepthCalc { blend_weight: 0.3, blur_radius: 2, reverse: false }
}

#[test]
fn test_transform_chains_match() {
    let inputs = [Bytes::from_static(b"frame-a"), Bytes::from_static(b"frame-b")];
    let cases = vec![
        vec![resample(1.0), color_adjust()],
        vec![color_adjust(), resample(0.5), color_adjust()],
        vec![depth_calc(), resample(1.0), resample(2.0)],
    ];
    for params in cases {
        let p = pair();
        let server = p.chained.transform(&inputs, &params, None).unwrap();
        let client = p.unchained.transform(&inputs, &params, None).unwrap();
        assert_eq!(server, client, "{} stages", params.len());
        assert!(!server.images.is_empty());

        assert!(p.chained_service.requests().is_empty());
        assert!(p.unchained_service.chains().is_empty());
        assert_stage_inputs(&p);
    }
}

#[test]
fn test_transform_then_generate_matches() {
    let image = Bytes::from_static(b"source");
    for params in [vec![resample(1.0)], vec![depth_calc(), resample(0.5)]] {
        let p = pair();
        let prompts = PromptSet::new().text("a lighthouse", 1.0);
        let generate = p
            .chained
            .build_generate_request(&prompts, &ImageParams::new().seed(9))
            .unwrap();

        let server = p
            .chained
            .transform_and_generate(image.clone(), &params, generate.clone(), None)
            .unwrap();
        let client = p
            .unchained
            .transform_and_generate(image.clone(), &params, generate, None)
            .unwrap();
        assert_eq!(server, client);
        assert!(server.starts_with(b"stable-diffusion-v1-5generate|"));
        assert_stage_inputs(&p);
    }
}

#[test]
fn test_transform_3d_matches() {
    for images in [
        vec![Bytes::from_static(b"view")],
        vec![Bytes::from_static(b"view-a"), Bytes::from_static(b"view-b")],
    ] {
        let p = pair();
        let server = p
            .chained
            .transform_3d(&images, depth_calc(), resample(1.0), None)
            .unwrap();
        let client = p
            .unchained
            .transform_3d(&images, depth_calc(), resample(1.0), None)
            .unwrap();
        assert_eq!(server, client, "{} images", images.len());
        assert!(server.masks.is_some());
        assert_stage_inputs(&p);
    }
}

#[test]
fn test_transform_3d_warp_sees_every_image_then_depth() {
    let images = [Bytes::from_static(b"view-a"), Bytes::from_static(b"view-b")];
    let p = pair();
    p.unchained
        .transform_3d(&images, depth_calc(), resample(1.0), None)
        .unwrap();

    let sent = p.unchained_service.requests();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].prompt, vec![Prompt::image(images[0].clone())]);

    let depth = Bytes::from_static(b"transform-server-v1depth_calc|view-a");
    assert_eq!(
        sent[1].prompt,
        vec![
            Prompt::image(images[0].clone()),
            Prompt::image(images[1].clone()),
            Prompt::Artifact(Artifact::tensor(Tensor {
                dtype: "float32".into(),
                shape: vec![depth.len() as u64],
                data: depth,
            })),
        ]
    );
}
