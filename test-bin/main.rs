#![allow(unused)]

use frame_graph::config::GraphConfig;
use frame_graph::device::recording::RecordingDevice;
use frame_graph::device::NativeTexture;
use frame_graph::graph::{
    Access, BufferDesc, BufferUsage, Command, DepthStencilAccess, GraphBuilder, GraphContext,
    LoadAction, PassFlags, PassParameters, TextureDesc, TextureFormat, TextureUsage,
};
use frame_graph::tracing::tracing_subscriber::install_tracing_subscriber;
use frame_graph::tracing::Severity;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn record_frame(graph: &mut GraphBuilder<'_>, back_buffer: NativeTexture) {
    let depth = graph.create_texture(
        "Scene Depth",
        TextureDesc::new_2d(
            WIDTH,
            HEIGHT,
            TextureFormat::Depth24PlusStencil8,
            TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let albedo = graph.create_texture(
        "GBuffer Albedo",
        TextureDesc::new_2d(
            WIDTH,
            HEIGHT,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let normals = graph.create_texture(
        "GBuffer Normals",
        TextureDesc::new_2d(
            WIDTH,
            HEIGHT,
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let ao = graph.create_texture(
        "Ambient Occlusion",
        TextureDesc::new_2d(
            WIDTH / 2,
            HEIGHT / 2,
            TextureFormat::R8Unorm,
            TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let hdr = graph.create_texture(
        "Scene Color",
        TextureDesc::new_2d(
            WIDTH,
            HEIGHT,
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let luminance = graph.create_buffer(
        "Luminance",
        BufferDesc::new(
            256 * 4,
            BufferUsage::UNORDERED_ACCESS | BufferUsage::SHADER_RESOURCE,
        ),
    );
    let swapchain = graph.register_external_texture(
        "Back Buffer",
        back_buffer,
        TextureDesc::new_2d(
            WIDTH,
            HEIGHT,
            TextureFormat::Bgra8Unorm,
            TextureUsage::RENDER_TARGET | TextureUsage::PRESENT,
        ),
        Access::PRESENT,
    );

    graph.add_pass(
        "Depth Prepass",
        PassFlags::RASTER,
        PassParameters::new().depth_stencil(depth, DepthStencilAccess::Write, LoadAction::Clear),
        |ctx| ctx.record("draw opaque depth"),
    );
    graph.add_pass(
        "Base Pass",
        PassFlags::RASTER,
        PassParameters::new()
            .render_target(albedo, LoadAction::Clear)
            .render_target(normals, LoadAction::Clear)
            .depth_stencil(depth, DepthStencilAccess::Read, LoadAction::Load)
            .workload(4),
        |ctx| ctx.record("draw opaque"),
    );
    graph.add_pass(
        "SSAO",
        PassFlags::COMPUTE | PassFlags::ASYNC_COMPUTE,
        PassParameters::new()
            .texture(depth, Access::SRV_COMPUTE)
            .texture(normals, Access::SRV_COMPUTE)
            .texture(ao, Access::UAV_COMPUTE),
        move |ctx| {
            let target = ctx.texture(ao);
            ctx.record(format!("dispatch ssao into {:?}", target));
        },
    );
    graph.add_pass(
        "Lighting",
        PassFlags::RASTER,
        PassParameters::new()
            .texture(albedo, Access::SRV_GRAPHICS)
            .texture(normals, Access::SRV_GRAPHICS)
            .texture(ao, Access::SRV_GRAPHICS)
            .render_target(hdr, LoadAction::DontCare),
        |ctx| ctx.record("fullscreen lighting"),
    );
    graph.add_pass(
        "Translucency",
        PassFlags::RASTER,
        PassParameters::new()
            .render_target(hdr, LoadAction::Load)
            .depth_stencil(depth, DepthStencilAccess::Read, LoadAction::Load),
        |ctx| ctx.record("draw translucent"),
    );
    graph.add_pass(
        "Luminance Histogram",
        PassFlags::COMPUTE,
        PassParameters::new()
            .texture(hdr, Access::SRV_COMPUTE)
            .buffer(luminance, Access::UAV_COMPUTE),
        |ctx| ctx.record("dispatch histogram"),
    );
    // nothing reads the overlay, the pass is culled
    let overlay = graph.create_texture(
        "Debug Overlay",
        TextureDesc::new_2d(WIDTH, HEIGHT, TextureFormat::Rgba8Unorm, TextureUsage::RENDER_TARGET),
    );
    graph.add_pass(
        "Debug Wireframe",
        PassFlags::RASTER,
        PassParameters::new().render_target(overlay, LoadAction::Clear),
        |ctx| ctx.record("draw wireframe"),
    );
    graph.add_pass(
        "Tonemap",
        PassFlags::RASTER,
        PassParameters::new()
            .texture(hdr, Access::SRV_GRAPHICS)
            .buffer(luminance, Access::SRV_GRAPHICS)
            .render_target(swapchain, LoadAction::DontCare),
        |ctx| ctx.record("fullscreen tonemap"),
    );
}

fn main() {
    let mut severity = None;
    let mut immediate = false;
    let mut dump = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--immediate" => immediate = true,
            "--dump" => dump = true,
            other => severity = Severity::parse(other),
        }
    }
    install_tracing_subscriber(severity);

    let config = if immediate {
        GraphConfig::immediate()
    } else {
        GraphConfig::default()
    };
    let mut context = GraphContext::new(config).unwrap();
    let device = RecordingDevice::new();

    for frame in 0..3u64 {
        let mut graph = GraphBuilder::new(&mut context, &device);
        record_frame(&mut graph, NativeTexture(0xB000 + frame % 2));
        if dump && frame == 0 {
            graph.dump_graph();
            graph.visualize("Scene Color");
        }

        let report = graph.execute().unwrap();
        if let Some(dot) = &report.graph_dump {
            println!("{dot}");
        }
        for (name, timeline) in &report.visualizations {
            println!("{name}:\n{timeline}");
        }

        let streams = device.submitted();
        let commands = streams.last().map(|s| s.commands()).unwrap_or_default();
        let user = commands
            .iter()
            .filter(|c| matches!(c, Command::User { .. }))
            .count();
        println!(
            "frame {frame}: {} commands ({user} from passes), {:?}",
            commands.len(),
            report.stats
        );
        device.clear();
    }

    let trimmed = context.pool_mut().trim(&device, 0);
    println!("pool: {} resident, {} trimmed", context.pool().len(), trimmed);
}
