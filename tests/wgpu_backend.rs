// tests/wgpu_backend.rs
// The WGSL effect on a real adapter must agree with the software kernels.
// Every test returns early when no adapter is available.

use mlaa::gpu::{engine_info, WgpuDevice};
use mlaa::software::SoftwareDevice;
use mlaa::{
    ErrorPolicy, ExternalStorage, GraphicsDevice, InputMode, LookupFormat, LookupImage,
    MemoryAssets, Mlaa, MlaaConfig, MlaaError, PixelCenter, SurfacePair,
};

const W: u32 = 8;
const H: u32 = 8;

fn gpu_or_skip() -> Option<WgpuDevice> {
    let device = WgpuDevice::shared();
    match engine_info() {
        Some(info) => eprintln!("running on {info}"),
        None => eprintln!("no GPU adapter available, skipping"),
    }
    device
}

fn assets() -> MemoryAssets {
    let area = LookupImage::filled(5, 5, LookupFormat::Rgba8, &[128, 0, 0, 128]).unwrap();
    let search = LookupImage::filled(8, 1, LookupFormat::R8, &[255]).unwrap();
    MemoryAssets::builtin_wgsl(area, search).unwrap()
}

fn config() -> MlaaConfig {
    MlaaConfig::default().with_policy(ErrorPolicy::Strict)
}

/// Dark square in the lower right on a light background
fn square() -> Vec<u8> {
    (0..H)
        .flat_map(|y| (0..W).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            if x >= 3 && y >= 4 {
                [20, 30, 40, 255]
            } else {
                [230, 220, 210, 255]
            }
        })
        .collect()
}

fn software_reference(rgba: &[u8], mode: InputMode) -> (Vec<u8>, Vec<u8>) {
    let device = SoftwareDevice::new();
    let source = device.create_color_texture(W, H, rgba).unwrap();
    let destination = SurfacePair::create(&device, "destination", W, H).unwrap();
    let mut mlaa = Mlaa::with_config(&device, W, H, ExternalStorage::none(), &assets(), config()).unwrap();
    mlaa.run(&source, &source, &destination.surface, mode).unwrap();
    (
        device.read_rgba8(&destination.texture),
        device.read_rgba8(mlaa.edge_texture()),
    )
}

#[test]
fn wgpu_matches_software_reference() {
    let Some(device) = gpu_or_skip() else {
        return;
    };
    assert_eq!(device.pixel_center(), PixelCenter::Centered);

    let rgba = square();
    for mode in [InputMode::Luma, InputMode::Color] {
        let source = device.create_color_texture(W, H, &rgba).unwrap();
        let destination = SurfacePair::create(&device, "destination", W, H).unwrap();
        let mut mlaa = Mlaa::with_config(&device, W, H, ExternalStorage::none(), &assets(), config()).unwrap();
        mlaa.run(&source, &source, &destination.surface, mode).unwrap();

        let output = device.read_rgba8(&destination.texture).unwrap();
        let edges = device.read_rgba8(mlaa.edge_texture()).unwrap();
        let (expected_output, expected_edges) = software_reference(&rgba, mode);

        assert_eq!(edges, expected_edges, "{mode} edge map");
        for (i, (got, want)) in output.iter().zip(&expected_output).enumerate() {
            // Filtering precision differs between rasterizers by a few LSB
            assert!(
                (*got as i32 - *want as i32).abs() <= 3,
                "{mode} byte {i}: gpu {got}, software {want}"
            );
        }
    }
}

#[test]
fn wgpu_depth_mode_detects_depth_steps() {
    let Some(device) = gpu_or_skip() else {
        return;
    };
    let rgba = vec![128u8; (W * H * 4) as usize];
    let depth: Vec<f32> = (0..W * H).map(|i| if i / W < 4 { 0.25 } else { 0.75 }).collect();

    let source = device.create_color_texture(W, H, &rgba).unwrap();
    let input = device.create_depth_texture(W, H, &depth).unwrap();
    let destination = SurfacePair::create(&device, "destination", W, H).unwrap();
    let mut mlaa = Mlaa::with_config(&device, W, H, ExternalStorage::none(), &assets(), config()).unwrap();
    mlaa.run(&input, &source, &destination.surface, InputMode::Depth)
        .unwrap();

    let edges = device.read_rgba8(mlaa.edge_texture()).unwrap();
    for y in 0..H {
        for x in 0..W {
            let i = ((y * W + x) * 4) as usize;
            let top = if y == 4 { 255 } else { 0 };
            assert_eq!(&edges[i..i + 4], &[0, top, 0, 0], "edge at ({x},{y})");
        }
    }
}

#[test]
fn wgpu_rejects_effect_without_contract() {
    let Some(device) = gpu_or_skip() else {
        return;
    };
    let area = LookupImage::filled(5, 5, LookupFormat::Rgba8, &[0; 4]).unwrap();
    let search = LookupImage::filled(8, 1, LookupFormat::R8, &[255]).unwrap();

    let broken = MemoryAssets::new("fn main() {", area.clone(), search.clone()).unwrap();
    let result = Mlaa::with_config(&device, W, H, ExternalStorage::none(), &broken, config());
    assert!(matches!(result, Err(MlaaError::ShaderCompilation(_))));

    let without_blending = mlaa::BUILTIN_WGSL.replace("fn NeighborhoodBlending", "fn Unused");
    let partial = MemoryAssets::new(without_blending, area, search).unwrap();
    let result = Mlaa::with_config(&device, W, H, ExternalStorage::none(), &partial, config());
    assert!(matches!(result, Err(MlaaError::MissingTechnique(_))));
}

#[test]
fn wgpu_does_not_cache_pipelines_that_fail_validation() {
    let Some(device) = gpu_or_skip() else {
        return;
    };
    // Integer output cannot be written to the RGBA8 unorm target
    let code = mlaa::BUILTIN_WGSL.replace("fn NeighborhoodBlending(", "fn UnusedBlending(")
        + "\n@fragment\nfn NeighborhoodBlending(v: VertexOutput) -> @location(0) vec4<u32> {\n    return vec4<u32>(0u);\n}\n";
    let area = LookupImage::filled(5, 5, LookupFormat::Rgba8, &[128, 0, 0, 128]).unwrap();
    let search = LookupImage::filled(8, 1, LookupFormat::R8, &[255]).unwrap();
    let assets = MemoryAssets::new(code, area, search).unwrap();

    let rgba = square();
    let source = device.create_color_texture(W, H, &rgba).unwrap();
    let destination = SurfacePair::create(&device, "destination", W, H).unwrap();
    let config = MlaaConfig::default().with_policy(ErrorPolicy::Permissive);
    let mut mlaa = Mlaa::with_config(&device, W, H, ExternalStorage::none(), &assets, config).unwrap();

    for frame in 0..2 {
        let err = mlaa
            .run(&source, &source, &destination.surface, InputMode::Luma)
            .unwrap_err();
        assert!(
            matches!(&err, MlaaError::Submission(msg) if msg.starts_with("CreateRenderPipeline")),
            "frame {frame}: {err}"
        );
        // Edge detection and blend weights only
        assert_eq!(mlaa.effect().cached_pipelines(), 2, "frame {frame}");
    }
}
