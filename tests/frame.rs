use frame_graph::{
    device::{
        recording::RecordingDevice, NativeResource, NativeTexture, ResourcePlacement,
    },
    graph::{
        Access, AliasingInfo, BufferDesc, BufferUsage, Command, DepthStencilAccess,
        ExtractedBuffer, ExtractedTexture, GraphBuilder, GraphContext, GraphPass, GraphResource,
        LoadAction, PassFlags, PassParameters, Pipeline, PipelineMask, ResourceFlags, TextureDesc,
        TextureFormat, TextureUsage,
    },
    GraphConfig,
};

fn context(config: GraphConfig) -> GraphContext {
    GraphContext::new(GraphConfig {
        validation: true,
        ..config
    })
    .unwrap()
}

fn texture_desc(format: TextureFormat, usage: TextureUsage) -> TextureDesc {
    TextureDesc::new_2d(16, 16, format, usage)
}

fn compute_desc() -> TextureDesc {
    texture_desc(
        TextureFormat::Rgba8Unorm,
        TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
    )
}

/// Commands recorded between the begin and the end of `pass`.
fn pass_commands(commands: &[Command], pass: GraphPass) -> &[Command] {
    let begin = commands
        .iter()
        .position(|c| *c == Command::BeginPass(pass))
        .unwrap();
    let end = commands
        .iter()
        .position(|c| *c == Command::EndPass(pass))
        .unwrap();
    &commands[begin..=end]
}

/// A small deferred frame with an async compute pass and a pass nothing consumes.
fn record_scene(graph: &mut GraphBuilder<'_>) -> (ExtractedTexture, ExtractedBuffer) {
    let depth = graph.create_texture(
        "Depth",
        texture_desc(
            TextureFormat::Depth32Float,
            TextureUsage::DEPTH_STENCIL | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let gbuffer = graph.create_texture(
        "GBuffer",
        texture_desc(
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let ao = graph.create_texture(
        "AO",
        texture_desc(
            TextureFormat::R8Unorm,
            TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let color = graph.create_texture(
        "Color",
        texture_desc(
            TextureFormat::Rgba16Float,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let overlay = graph.create_texture(
        "Debug Overlay",
        texture_desc(TextureFormat::Rgba8Unorm, TextureUsage::RENDER_TARGET),
    );
    let histogram = graph.create_buffer(
        "Histogram",
        BufferDesc::new(
            1024,
            BufferUsage::UNORDERED_ACCESS | BufferUsage::SHADER_RESOURCE,
        ),
    );

    graph.add_pass(
        "Depth Prepass",
        PassFlags::RASTER,
        PassParameters::new().depth_stencil(depth, DepthStencilAccess::Write, LoadAction::Clear),
        |ctx| ctx.record("depth"),
    );
    graph.add_pass(
        "GBuffer",
        PassFlags::RASTER,
        PassParameters::new()
            .depth_stencil(depth, DepthStencilAccess::Read, LoadAction::Load)
            .render_target(gbuffer, LoadAction::Clear),
        |ctx| ctx.record("gbuffer"),
    );
    graph.add_pass(
        "SSAO",
        PassFlags::COMPUTE | PassFlags::ASYNC_COMPUTE,
        PassParameters::new()
            .texture(depth, Access::SRV_COMPUTE)
            .texture(ao, Access::UAV_COMPUTE),
        |ctx| ctx.record("ssao"),
    );
    graph.add_pass(
        "Debug Overlay",
        PassFlags::RASTER,
        PassParameters::new().render_target(overlay, LoadAction::Clear),
        |ctx| ctx.record("overlay"),
    );
    graph.add_pass(
        "Lighting",
        PassFlags::RASTER,
        PassParameters::new()
            .texture(gbuffer, Access::SRV_GRAPHICS)
            .texture(ao, Access::SRV_GRAPHICS)
            .render_target(color, LoadAction::Clear),
        |ctx| ctx.record("lighting"),
    );
    graph.add_pass(
        "Histogram",
        PassFlags::COMPUTE,
        PassParameters::new()
            .texture(color, Access::SRV_COMPUTE)
            .buffer(histogram, Access::UAV_COMPUTE),
        move |ctx| {
            let buffer = ctx.buffer(histogram);
            ctx.record(format!("histogram {}", buffer.0));
        },
    );

    (
        graph.extract_texture(color, Access::SRV_GRAPHICS),
        graph.extract_buffer(histogram, Access::SRV_COMPUTE),
    )
}

#[test]
fn culling_keeps_extracted_results() {
    let run = |cull_passes: bool| {
        let device = RecordingDevice::new();
        let mut context = context(GraphConfig {
            cull_passes,
            ..Default::default()
        });
        let mut graph = GraphBuilder::new(&mut context, &device);
        let (color, histogram) = record_scene(&mut graph);
        let report = graph.execute().unwrap();
        (
            color.get().map(|(_, access)| access),
            histogram.get().map(|(_, access)| access),
            report.stats,
        )
    };

    let (color, histogram, culled) = run(true);
    let (color_all, histogram_all, all) = run(false);

    assert_eq!(color, Some(Access::SRV_GRAPHICS));
    assert_eq!(histogram, Some(Access::SRV_COMPUTE));
    assert_eq!(color, color_all);
    assert_eq!(histogram, histogram_all);

    assert_eq!(culled.culled_passes, 1);
    assert_eq!(all.culled_passes, 0);
    assert!(culled.transitions < all.transitions);
}

#[test]
fn parallel_recording_matches_serial() {
    let run = |parallel: bool| {
        let device = RecordingDevice::new();
        let mut context = context(GraphConfig {
            parallel_execute: parallel,
            parallel_setup: parallel,
            parallel_execute_pass_min: 1,
            parallel_execute_pass_max: 2,
            threads: Some(4),
            ..Default::default()
        });
        let mut graph = GraphBuilder::new(&mut context, &device);
        let (color, histogram) = record_scene(&mut graph);
        let report = graph.execute().unwrap();
        (
            device.submitted(),
            device.created(),
            color.get(),
            histogram.get(),
            report.stats.transitions,
        )
    };

    let parallel = run(true);
    let serial = run(false);
    assert_eq!(parallel.0, serial.0);
    assert_eq!(parallel.1, serial.1);
    assert_eq!(parallel.2, serial.2);
    assert_eq!(parallel.3, serial.3);
    assert_eq!(parallel.4, serial.4);
}

#[test]
fn adjacent_reads_need_no_transition() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let texture = graph.create_texture("Shadow Map", compute_desc());
    graph.add_pass(
        "Write",
        PassFlags::COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |_| {},
    );
    for name in ["Read A", "Read B"] {
        graph.add_pass(
            name,
            PassFlags::COMPUTE | PassFlags::NEVER_CULL,
            PassParameters::new().texture(texture, Access::SRV_COMPUTE),
            |_| {},
        );
    }
    graph.add_pass(
        "Read C",
        PassFlags::RASTER | PassFlags::NEVER_CULL,
        PassParameters::new().texture(texture, Access::SRV_GRAPHICS),
        |_| {},
    );
    graph.execute().unwrap();

    let resource: GraphResource = texture.into();
    let transitions = device
        .transitions()
        .into_iter()
        .flat_map(|batch| batch.transitions)
        .filter(|t| t.resource == resource)
        .collect::<Vec<_>>();
    assert!(transitions
        .iter()
        .all(|t| !(t.before.is_read_only() && t.after.is_read_only())));
    assert_eq!(
        transitions
            .iter()
            .filter(|t| t.before == Access::UAV_COMPUTE)
            .count(),
        1
    );
}

#[test]
fn async_compute_reader_waits_for_producer() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let texture = graph.create_texture("Particles", compute_desc());
    let write = graph.add_pass(
        "Simulate",
        PassFlags::COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |_| {},
    );
    let read = graph.add_pass(
        "Sort",
        PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(texture, Access::SRV_COMPUTE),
        |ctx| ctx.record("sort"),
    );
    graph.execute().unwrap();

    let streams = device.submitted();
    let commands = streams[0].commands();
    let write_at = commands
        .iter()
        .position(|c| *c == Command::BeginPass(write))
        .unwrap();
    let read_at = commands
        .iter()
        .position(|c| *c == Command::BeginPass(read))
        .unwrap();
    assert!(write_at < read_at);
    assert_eq!(
        commands[read_at - 1],
        Command::SetPipeline(Pipeline::AsyncCompute)
    );

    // some batch begun by the producer on graphics is waited on by the reader
    let begun = pass_commands(commands, write)
        .iter()
        .filter_map(|c| match *c {
            Command::BeginTransitions {
                pipeline: Pipeline::Graphics,
                token,
            } => Some(token),
            _ => None,
        })
        .collect::<Vec<_>>();
    let waited = pass_commands(commands, read).iter().any(|c| {
        matches!(*c, Command::EndTransitions { pipeline: Pipeline::AsyncCompute, token } if begun.contains(&token))
    });
    assert!(waited);
}

#[test]
fn multi_pipeline_readers_share_one_batch() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let texture = graph.create_texture("T", compute_desc());
    let a = graph.add_pass(
        "A",
        PassFlags::COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |_| {},
    );
    let b = graph.add_pass(
        "B",
        PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(texture, Access::SRV_COMPUTE),
        |_| {},
    );
    let c = graph.add_pass(
        "C",
        PassFlags::RASTER | PassFlags::NEVER_CULL,
        PassParameters::new().texture(texture, Access::SRV_GRAPHICS),
        |_| {},
    );
    graph.execute().unwrap();

    let resource: GraphResource = texture.into();
    let batches = device.transitions();
    let write_to_read = batches
        .iter()
        .filter(|batch| {
            batch.transitions.iter().any(|t| {
                t.resource == resource
                    && t.before == Access::UAV_COMPUTE
                    && t.after == Access::SRV_COMPUTE | Access::SRV_GRAPHICS
            })
        })
        .collect::<Vec<_>>();
    assert_eq!(write_to_read.len(), 1);
    let shared = write_to_read[0];
    assert_eq!(shared.pipelines_before, PipelineMask::GRAPHICS);
    assert_eq!(shared.pipelines_after, PipelineMask::ALL);
    assert_eq!(shared.passes[Pipeline::Graphics], Some(a));

    // the async queue also gets the fork of the graphics pipeline
    let fork = batches
        .iter()
        .find(|batch| {
            batch.pipelines_before == PipelineMask::GRAPHICS
                && batch.pipelines_after == PipelineMask::ASYNC_COMPUTE
        })
        .unwrap();
    assert_eq!(fork.passes[Pipeline::Graphics], Some(a));

    let streams = device.submitted();
    let commands = streams[0].commands();
    let ends = |pass: GraphPass, pipeline: Pipeline, token| {
        pass_commands(commands, pass)
            .contains(&Command::EndTransitions { pipeline, token })
    };
    assert!(ends(b, Pipeline::AsyncCompute, shared.token));
    assert!(ends(b, Pipeline::AsyncCompute, fork.token));
    // graphics waits right after the writer, the reader on graphics needs no fence
    assert!(ends(a, Pipeline::Graphics, shared.token));
    assert!(!ends(c, Pipeline::Graphics, shared.token));
    assert!(!ends(c, Pipeline::Graphics, fork.token));
}

#[test]
fn graphics_consumer_joins_async_producer() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let texture = graph.create_texture("Volume", compute_desc());
    let produce = graph.add_pass(
        "Inject",
        PassFlags::ASYNC_COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |ctx| ctx.record("inject"),
    );
    let consume = graph.add_pass(
        "Composite",
        PassFlags::RASTER | PassFlags::NEVER_CULL,
        PassParameters::new().texture(texture, Access::SRV_GRAPHICS),
        |ctx| ctx.record("composite"),
    );
    graph.execute().unwrap();

    let resource: GraphResource = texture.into();
    let join = device
        .transitions()
        .into_iter()
        .find(|batch| {
            batch.transitions.iter().any(|t| {
                t.resource == resource
                    && t.before == Access::UAV_COMPUTE
                    && t.after == Access::SRV_GRAPHICS
            })
        })
        .unwrap();
    assert_eq!(join.pipelines_before, PipelineMask::ASYNC_COMPUTE);
    assert_eq!(join.pipelines_after, PipelineMask::GRAPHICS);
    assert_eq!(join.passes[Pipeline::AsyncCompute], Some(produce));

    let streams = device.submitted();
    let commands = streams[0].commands();
    assert!(pass_commands(commands, produce).contains(&Command::BeginTransitions {
        pipeline: Pipeline::AsyncCompute,
        token: join.token,
    }));
    assert!(pass_commands(commands, consume).contains(&Command::EndTransitions {
        pipeline: Pipeline::Graphics,
        token: join.token,
    }));
}

#[test]
fn unread_resource_is_only_acquired_and_discarded() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let scratch = graph.create_texture("Scratch", compute_desc());
    let result = graph.create_texture("Result", compute_desc());
    let pass = graph.add_pass(
        "Pass 1",
        PassFlags::COMPUTE,
        PassParameters::new()
            .texture(scratch, Access::UAV_COMPUTE)
            .texture(result, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.extract_texture(result, Access::SRV_GRAPHICS);
    graph.execute().unwrap();

    let scratch: GraphResource = scratch.into();
    let batches = device.transitions();
    let mut transitions = batches
        .iter()
        .flat_map(|batch| batch.transitions.iter())
        .filter(|t| t.resource == scratch)
        .map(|t| (t.before, t.after))
        .collect::<Vec<_>>();
    transitions.sort();
    let mut expected = vec![
        (Access::DISCARD, Access::UAV_COMPUTE),
        (Access::UAV_COMPUTE, Access::DISCARD),
    ];
    expected.sort();
    assert_eq!(transitions, expected);

    let aliases = batches
        .iter()
        .flat_map(|batch| batch.aliases.iter())
        .filter(|alias| match alias {
            AliasingInfo::Acquire { resource, .. } | AliasingInfo::Discard { resource, .. } => {
                *resource == scratch
            }
        })
        .count();
    assert_eq!(aliases, 2);

    // all of it happens around the one pass which writes it
    for batch in &batches {
        if batch.transitions.iter().any(|t| t.resource == scratch) {
            assert_eq!(batch.passes[Pipeline::Graphics], Some(pass));
        }
    }
}

#[test]
fn external_registration_is_idempotent() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let native = NativeTexture(9000);
    let desc = texture_desc(
        TextureFormat::Bgra8Unorm,
        TextureUsage::RENDER_TARGET | TextureUsage::PRESENT,
    );
    let back_buffer = graph.register_external_texture("Back Buffer", native, desc, Access::PRESENT);
    let again = graph.register_external_texture("Swapchain", native, desc, Access::PRESENT);
    assert_eq!(back_buffer, again);

    graph.add_pass(
        "Tonemap",
        PassFlags::RASTER,
        PassParameters::new().render_target(back_buffer, LoadAction::DontCare),
        move |ctx| assert_eq!(ctx.texture(back_buffer), native),
    );
    graph.execute().unwrap();

    // external memory is never created by the graph
    assert!(device.created().is_empty());
    let transitions = device
        .transitions()
        .into_iter()
        .flat_map(|batch| batch.transitions)
        .filter(|t| t.native == NativeResource::Texture(native))
        .map(|t| (t.before, t.after))
        .collect::<Vec<_>>();
    assert_eq!(transitions.len(), 2);
    assert!(transitions.contains(&(Access::PRESENT, Access::RTV)));
    assert!(transitions.contains(&(Access::RTV, Access::PRESENT)));
}

#[test]
fn external_access_mode_is_set_once() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let texture = graph.create_texture("Lut", compute_desc());
    graph.add_pass(
        "Bake",
        PassFlags::COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |_| {},
    );
    let extracted = graph.extract_texture(texture, Access::SRV_GRAPHICS);

    let before = graph.pass_count();
    let handover = graph.set_external_access_mode(texture, Access::SRV_GRAPHICS);
    let again = graph.set_external_access_mode(texture, Access::SRV_GRAPHICS);
    assert_eq!(handover, again);
    assert_eq!(graph.pass_count(), before + 1);

    graph.add_pass(
        "Sample",
        PassFlags::RASTER | PassFlags::NEVER_CULL,
        PassParameters::new().texture(texture, Access::SRV_GRAPHICS),
        |_| {},
    );
    graph.execute().unwrap();
    assert_eq!(extracted.get().map(|(_, access)| access), Some(Access::SRV_GRAPHICS));
}

#[test]
fn async_reader_waits_for_external_access_handover() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let shared = Access::SRV_COMPUTE | Access::SRV_GRAPHICS;
    let texture = graph.create_texture("Lut", compute_desc());
    graph.add_pass(
        "Bake",
        PassFlags::COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.extract_texture(texture, shared);
    let handover = graph.set_external_access_mode(texture, shared);
    let sample = graph.add_pass(
        "Sample",
        PassFlags::ASYNC_COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(texture, Access::SRV_COMPUTE),
        |_| {},
    );
    graph.execute().unwrap();

    let resource: GraphResource = texture.into();
    let batches = device.transitions();
    let to_external = batches
        .iter()
        .find(|batch| {
            batch.transitions.iter().any(|t| {
                t.resource == resource && t.before == Access::UAV_COMPUTE && t.after == shared
            })
        })
        .unwrap();
    let fork = batches
        .iter()
        .find(|batch| {
            batch.pipelines_before == PipelineMask::GRAPHICS
                && batch.pipelines_after == PipelineMask::ASYNC_COMPUTE
        })
        .unwrap();
    // the async queue starts only once graphics finished the handover
    assert_eq!(fork.passes[Pipeline::Graphics], Some(handover));

    let streams = device.submitted();
    let commands = streams[0].commands();
    let in_handover = pass_commands(commands, handover);
    let ended = in_handover
        .iter()
        .position(|c| {
            *c == Command::EndTransitions {
                pipeline: Pipeline::Graphics,
                token: to_external.token,
            }
        })
        .unwrap();
    let forked = in_handover
        .iter()
        .position(|c| {
            *c == Command::BeginTransitions {
                pipeline: Pipeline::Graphics,
                token: fork.token,
            }
        })
        .unwrap();
    assert!(ended < forked);
    assert!(pass_commands(commands, sample).contains(&Command::EndTransitions {
        pipeline: Pipeline::AsyncCompute,
        token: fork.token,
    }));
}

#[test]
fn extraction_hands_out_pooled_memory() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());

    let frame = |context: &mut GraphContext| {
        let mut graph = GraphBuilder::new(context, &device);
        let color = graph.create_texture("Color", compute_desc());
        graph.add_pass(
            "Draw",
            PassFlags::COMPUTE,
            PassParameters::new().texture(color, Access::UAV_COMPUTE),
            |_| {},
        );
        let extracted = graph.extract_texture(color, Access::SRV_GRAPHICS);
        assert_eq!(extracted.get(), None);
        graph.execute().unwrap();
        extracted.get().unwrap()
    };

    let (first, access) = frame(&mut context);
    assert_eq!(access, Access::SRV_GRAPHICS);
    let created = device.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].native, NativeResource::Texture(first));
    assert_eq!(created[0].placement, ResourcePlacement::Pooled);

    // the caller owns the first texture now, the pool can't hand it out again
    let (second, _) = frame(&mut context);
    assert_ne!(first, second);
    assert_eq!(device.created().len(), 2);
    assert_eq!(context.frame(), 2);
}

#[test]
fn pooled_memory_is_reused_across_frames() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());

    let frame = |context: &mut GraphContext| {
        let mut graph = GraphBuilder::new(context, &device);
        let history = graph.create_texture(
            "History",
            compute_desc().with_flags(ResourceFlags::FORCE_NON_TRANSIENT),
        );
        graph.add_pass(
            "Accumulate",
            PassFlags::COMPUTE,
            PassParameters::new().texture(history, Access::UAV_COMPUTE),
            |_| {},
        );
        graph.add_pass(
            "Resolve",
            PassFlags::COMPUTE | PassFlags::NEVER_CULL,
            PassParameters::new().texture(history, Access::SRV_COMPUTE),
            |_| {},
        );
        graph.execute().unwrap()
    };

    let first = frame(&mut context);
    assert_eq!(first.stats.pooled_allocations, 1);
    assert_eq!(first.stats.pooled_reuses, 0);
    assert_eq!(context.pool().len(), 1);
    device.clear();

    let second = frame(&mut context);
    assert_eq!(second.stats.pooled_reuses, 1);
    assert!(device.created().is_empty());
    // the pool remembers the access the texture was left in
    let transitions = device
        .transitions()
        .into_iter()
        .flat_map(|batch| batch.transitions)
        .map(|t| (t.before, t.after))
        .collect::<Vec<_>>();
    assert!(transitions.contains(&(Access::SRV_COMPUTE, Access::UAV_COMPUTE)));
}

#[test]
fn consecutive_raster_passes_share_a_render_pass() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let color = graph.create_texture(
        "Color",
        texture_desc(
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_TARGET | TextureUsage::SHADER_RESOURCE,
        ),
    );
    let opaque = graph.add_pass(
        "Opaque",
        PassFlags::RASTER,
        PassParameters::new().render_target(color, LoadAction::Clear),
        |ctx| ctx.record("opaque"),
    );
    let transparent = graph.add_pass(
        "Transparent",
        PassFlags::RASTER,
        PassParameters::new().render_target(color, LoadAction::Load),
        |ctx| ctx.record("transparent"),
    );
    graph.extract_texture(color, Access::SRV_GRAPHICS);
    let report = graph.execute().unwrap();
    assert!(report.stats.render_pass_merges > 0);

    let streams = device.submitted();
    let commands = streams[0].commands();
    let begins = commands
        .iter()
        .filter(|c| matches!(c, Command::BeginRenderPass(_)))
        .collect::<Vec<_>>();
    let ends = commands
        .iter()
        .filter(|c| matches!(c, Command::EndRenderPass(_)))
        .collect::<Vec<_>>();
    assert_eq!(begins, [&Command::BeginRenderPass(opaque)]);
    assert_eq!(ends, [&Command::EndRenderPass(transparent)]);
}

#[test]
fn disjoint_transients_alias() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let x = graph.create_texture("X", compute_desc());
    let y = graph.create_texture("Y", compute_desc());
    let out_x = graph.create_texture("Out X", compute_desc());
    let out_y = graph.create_texture("Out Y", compute_desc());

    let write = |access| PassParameters::new().texture(x, access);
    graph.add_pass("Write X", PassFlags::COMPUTE, write(Access::UAV_COMPUTE), |_| {});
    graph.add_pass(
        "Read X",
        PassFlags::COMPUTE,
        write(Access::SRV_COMPUTE).texture(out_x, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.add_pass(
        "Write Y",
        PassFlags::COMPUTE,
        PassParameters::new().texture(y, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.add_pass(
        "Read Y",
        PassFlags::COMPUTE,
        PassParameters::new()
            .texture(y, Access::SRV_COMPUTE)
            .texture(out_y, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.extract_texture(out_x, Access::SRV_GRAPHICS);
    graph.extract_texture(out_y, Access::SRV_GRAPHICS);
    let report = graph.execute().unwrap();
    assert_eq!(report.stats.transient_allocations, 2);

    let created = device.created();
    let placement = |name: &str| created.iter().find(|c| c.name == name).unwrap().clone();
    let (x_created, y_created) = (placement("X"), placement("Y"));
    assert!(matches!(x_created.placement, ResourcePlacement::Transient { offset: 0, .. }));
    assert_eq!(x_created.placement, y_created.placement);
    assert_eq!(placement("Out X").placement, ResourcePlacement::Pooled);

    let y_resource: GraphResource = y.into();
    let acquire = device
        .transitions()
        .into_iter()
        .flat_map(|batch| batch.aliases)
        .find_map(|alias| match alias {
            AliasingInfo::Acquire {
                resource, overlaps, ..
            } if resource == y_resource => Some(overlaps),
            _ => None,
        })
        .unwrap();
    assert_eq!(acquire.as_slice(), [x_created.native]);
}

/// A transient scratch texture feeding a pooled result.
fn record_resolve(graph: &mut GraphBuilder<'_>) {
    let scratch = graph.create_texture("Scratch", compute_desc());
    let result = graph.create_texture(
        "Result",
        compute_desc().with_flags(ResourceFlags::FORCE_NON_TRANSIENT),
    );
    graph.add_pass(
        "Fill",
        PassFlags::COMPUTE,
        PassParameters::new().texture(scratch, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.add_pass(
        "Resolve",
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new()
            .texture(scratch, Access::SRV_COMPUTE)
            .texture(result, Access::UAV_COMPUTE),
        |_| {},
    );
}

#[test]
fn transient_memory_is_returned_every_frame() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());

    for frame in 1..=3 {
        let mut graph = GraphBuilder::new(&mut context, &device);
        record_resolve(&mut graph);
        graph.execute().unwrap();

        let mut transient = device
            .created()
            .into_iter()
            .filter(|c| matches!(c.placement, ResourcePlacement::Transient { .. }))
            .map(|c| c.native)
            .collect::<Vec<_>>();
        let mut destroyed = device.destroyed();
        transient.sort();
        destroyed.sort();
        assert_eq!(transient.len(), frame);
        assert_eq!(destroyed, transient);
    }
    // the pooled result stays resident
    assert_eq!(context.pool().len(), 1);
}

#[test]
fn failed_frame_returns_transient_memory() {
    let device = RecordingDevice::new().fail_allocations_after(Some(1));
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);
    record_resolve(&mut graph);

    let error = graph.execute().unwrap_err();
    assert!(matches!(error, frame_graph::GraphError::PoolExhausted { .. }));
    let created = device.created();
    assert_eq!(created.len(), 1);
    assert!(matches!(created[0].placement, ResourcePlacement::Transient { .. }));
    assert_eq!(device.destroyed(), [created[0].native]);
}

#[test]
fn transient_heap_limit_fails_the_frame() {
    let device = RecordingDevice::new();
    let mut config = GraphConfig::default();
    config.transient_allocation.heap_size_limit = 512;
    let mut context = context(config);
    let pooled_desc = compute_desc().with_flags(ResourceFlags::FORCE_NON_TRANSIENT);

    let mut graph = GraphBuilder::new(&mut context, &device);
    let pooled = graph.create_texture("Pooled", pooled_desc);
    let big = graph.create_texture("Big", compute_desc());
    graph.add_pass(
        "Prepare",
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(pooled, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.add_pass(
        "Fill",
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(big, Access::UAV_COMPUTE),
        |_| {},
    );
    let error = graph.execute().unwrap_err();
    assert!(matches!(
        error,
        frame_graph::GraphError::TransientHeapExhausted { limit: 512, .. }
    ));
    assert!(device.submitted().is_empty());

    // the next frame starts over with the memory of the failed one
    let mut graph = GraphBuilder::new(&mut context, &device);
    let pooled = graph.create_texture("Pooled", pooled_desc);
    graph.add_pass(
        "Prepare",
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(pooled, Access::UAV_COMPUTE),
        |_| {},
    );
    let report = graph.execute().unwrap();
    assert_eq!(report.stats.pooled_reuses, 1);
    assert_eq!(device.created().len(), 1);
}

#[test]
fn immediate_mode_runs_everything_on_graphics() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::immediate());
    let mut graph = GraphBuilder::new(&mut context, &device);
    let (color, histogram) = record_scene(&mut graph);
    let report = graph.execute().unwrap();

    assert_eq!(report.stats.culled_passes, 0);
    assert_eq!(report.stats.parallel_pass_sets, 0);
    assert!(device
        .transitions()
        .iter()
        .all(|batch| batch.pipelines_before == PipelineMask::GRAPHICS
            && batch.pipelines_after == PipelineMask::GRAPHICS));
    let streams = device.submitted();
    assert!(!streams[0]
        .commands()
        .contains(&Command::SetPipeline(Pipeline::AsyncCompute)));
    assert_eq!(color.get().map(|(_, a)| a), Some(Access::SRV_GRAPHICS));
    assert_eq!(histogram.get().map(|(_, a)| a), Some(Access::SRV_COMPUTE));
}

#[test]
#[should_panic(expected = "which it did not bind")]
fn unbound_access_panics() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig {
        parallel_execute: false,
        ..Default::default()
    });
    let mut graph = GraphBuilder::new(&mut context, &device);

    let bound = graph.create_texture("Bound", compute_desc());
    let other = graph.create_texture("Other", compute_desc());
    graph.add_pass(
        "Other Writer",
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(other, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.add_pass(
        "Sneaky",
        PassFlags::COMPUTE | PassFlags::NEVER_CULL,
        PassParameters::new().texture(bound, Access::UAV_COMPUTE),
        move |ctx| {
            ctx.texture(other);
        },
    );
    let _ = graph.execute();
}

#[test]
#[should_panic(expected = "after being extracted")]
fn write_after_extraction_panics() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);

    let texture = graph.create_texture("Color", compute_desc());
    graph.add_pass(
        "Write",
        PassFlags::COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |_| {},
    );
    graph.extract_texture(texture, Access::SRV_GRAPHICS);
    graph.add_pass(
        "Write Again",
        PassFlags::COMPUTE,
        PassParameters::new().texture(texture, Access::UAV_COMPUTE),
        |_| {},
    );
}

#[test]
#[should_panic(expected = "can't be both RASTER and ASYNC_COMPUTE")]
fn raster_async_compute_panics() {
    let device = RecordingDevice::new();
    let mut context = context(GraphConfig::default());
    let mut graph = GraphBuilder::new(&mut context, &device);
    graph.add_pass(
        "Confused",
        PassFlags::RASTER | PassFlags::ASYNC_COMPUTE,
        PassParameters::new(),
        |_| {},
    );
}
