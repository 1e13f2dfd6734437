use std::fmt::Write;

use nu_ansi_term::{Color, Style};
use slice_group_by::GroupBy;

use crate::{
    tracing::shim_macros::warn,
    util::{format_utils::Fun, format_writer::FormatWriter},
};

use super::{
    access::Access, record::GraphBuilder, resource::Placement, GraphPass, GraphResource, Pipeline,
};

fn escape(str: &str) -> String {
    str.replace('\\', "\\\\").replace('"', "\\\"")
}

impl<'a> GraphBuilder<'a> {
    /// Requests a graphviz rendering of the compiled graph in the [`ExecutionReport`](super::ExecutionReport).
    pub fn dump_graph(&mut self) {
        self.dump_requested = true;
    }
    /// Requests the access timeline of the resource called `name` in the
    /// [`ExecutionReport`](super::ExecutionReport).
    pub fn visualize(&mut self, name: impl Into<String>) {
        self.visualize_requests.push(name.into());
    }

    pub(crate) fn write_graphviz(&self) -> String {
        let mut out = String::new();
        // writing into a String can't fail
        let _ = self.write_graphviz_into(&mut out);
        out
    }

    fn write_graphviz_into(&self, w: &mut dyn Write) -> std::fmt::Result {
        writeln!(w, "digraph G {{")?;
        writeln!(w, r#"fontname="Helvetica,Arial,sans-serif";"#)?;
        writeln!(
            w,
            r#"node[fontname="Helvetica,Arial,sans-serif"; shape=box; style=rounded];"#
        )?;

        let node = |pass: GraphPass| {
            Fun::new(move |w| {
                let data = &self.passes[pass.index()];
                write!(
                    w,
                    r#"p{}[label="{}""#,
                    pass.index(),
                    escape(&self.get_pass_display(pass).to_string())
                )?;
                if data.culled {
                    write!(w, r#"; style="rounded,filled"; fillcolor=gray90; fontcolor=gray50"#)?;
                }
                write!(w, "];")
            })
        };

        for pipeline in Pipeline::ALL {
            let passes = (0..self.passes.len())
                .map(GraphPass::new)
                .filter(|&p| self.passes[p.index()].pipeline == pipeline)
                .collect::<Vec<_>>();
            if passes.is_empty() {
                continue;
            }

            // subgraph cluster_Graphics {
            //     label="Graphics";
            //     subgraph cluster_merge_0 { p1; p2; }
            //     p0; p3;
            // }
            let nodes = Fun::new(|w| {
                for (i, &(first, last)) in self.merged_regions.iter().enumerate() {
                    if self.passes[first.index()].pipeline != pipeline {
                        continue;
                    }
                    write!(w, r#"subgraph cluster_merge_{i} {{label="render pass"; style=dotted; "#)?;
                    for index in first.index()..=last.index() {
                        write!(w, "{}", node(GraphPass::new(index)))?;
                    }
                    writeln!(w, "}}")?;
                }
                for &pass in &passes {
                    let merged = self
                        .merged_regions
                        .iter()
                        .any(|&(first, last)| first <= pass && pass <= last);
                    if !merged {
                        write!(w, "{}", node(pass))?;
                    }
                }
                Ok(())
            });

            writeln!(
                w,
                r#"subgraph cluster_{} {{label="{}"; style=dashed; {}}}"#,
                pipeline.name(),
                pipeline.name(),
                nodes
            )?;
        }

        // hard dependencies are solid, write after read ordering is dashed
        for (index, pass) in self.passes.iter().enumerate() {
            for dependency in &pass.dependencies {
                let style = if dependency.is_hard() {
                    ""
                } else {
                    "[style=dashed; color=darkgray]"
                };
                writeln!(w, "p{} -> p{}{};", dependency.get_pass().index(), index, style)?;
            }
        }

        for (index, pass) in self.passes.iter().enumerate() {
            if let Some(fork) = pass.graphics_fork_pass.get().filter(|_| pass.async_compute_begin) {
                writeln!(
                    w,
                    r#"p{} -> p{}[color=blue; label="fork"; constraint=false];"#,
                    fork.index(),
                    index
                )?;
            }
            if let Some(join) = pass.graphics_join_pass.get().filter(|_| pass.async_compute_end) {
                writeln!(
                    w,
                    r#"p{} -> p{}[color=red; label="join"; constraint=false];"#,
                    index,
                    join.index()
                )?;
            }
        }

        writeln!(w, "}}")
    }

    /// Renders how each surviving pass accesses the resource, `None` if no resource is called
    /// `name`.
    pub(crate) fn visualize_resource(&self, name: &str) -> Option<String> {
        let Some(index) = self.resources.iter().position(|r| r.name == name) else {
            warn!("Visualize: no resource is called '{}'", name);
            return None;
        };
        let mut out = FormatWriter::with_width(Vec::new(), "    ", 120);
        // writing into a Vec can't fail
        let _ = self.write_timeline(GraphResource::new(index), &mut out);
        String::from_utf8(out.into_inner()).ok()
    }

    fn write_timeline(&self, resource: GraphResource, w: &mut dyn Write) -> std::fmt::Result {
        let data = &self.resources[resource.index()];
        let placement = match data.placement {
            Placement::Unallocated => "unallocated".to_owned(),
            Placement::External => "external".to_owned(),
            Placement::Pooled => "pooled".to_owned(),
            Placement::Transient { offset, size } => format!("transient {offset}+{size}"),
        };
        writeln!(
            w,
            "{} {}, {}",
            Style::new().bold().paint(format!("'{}'", self.get_resource_display(resource))),
            placement,
            if data.desc.is_texture() { "texture" } else { "buffer" }
        )?;
        writeln!(w, "  initial {}", data.initial_access)?;

        let count = data.subresource_count();
        for (pass_index, pass) in self.passes.iter().enumerate() {
            let Some(state) = pass.resource_states.iter().find(|s| s.resource == resource) else {
                continue;
            };
            let accesses = state
                .states
                .iter()
                .map(|s| s.map(|id| self.state(id).access))
                .collect::<Vec<Option<Access>>>();

            let row = Fun::new(|w| {
                let mut start = 0;
                for group in accesses.linear_group_by(|a, b| a == b) {
                    let end = start + group.len();
                    if let Some(access) = group[0] {
                        let color = if access.is_writable() {
                            Color::Red
                        } else {
                            Color::Green
                        };
                        let range = if count == 1 {
                            String::new()
                        } else {
                            format!("[{start}..{end}] ")
                        };
                        write!(w, " {}{}", range, color.paint(access.to_string()))?;
                    }
                    start = end;
                }
                Ok(())
            });

            let label = format!(
                "  #{pass_index} {} ({})",
                self.get_pass_display(GraphPass::new(pass_index)),
                pass.pipeline.name()
            );
            if pass.culled {
                writeln!(w, "{} culled", Style::new().dimmed().paint(label))?;
            } else {
                writeln!(w, "{label}:{row}")?;
            }
        }

        if data.first_pass.is_some() {
            writeln!(w, "  final {}", self.final_access(resource))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        config::GraphConfig,
        device::recording::RecordingDevice,
        graph::{
            access::Access, record::PassParameters, GraphBuilder, GraphContext, PassFlags,
            TextureDesc, TextureFormat, TextureUsage,
        },
    };

    #[test]
    fn test_dump_and_visualize() {
        let device = RecordingDevice::new();
        let mut context = GraphContext::new(GraphConfig::default()).unwrap();
        let mut graph = GraphBuilder::new(&mut context, &device);

        let texture = graph.create_texture(
            "Scene \"Color\"",
            TextureDesc::new_2d(
                8,
                8,
                TextureFormat::Rgba8Unorm,
                TextureUsage::UNORDERED_ACCESS | TextureUsage::SHADER_RESOURCE,
            ),
        );
        graph.add_pass(
            "Write",
            PassFlags::COMPUTE,
            PassParameters::new().texture(texture, Access::UAV_COMPUTE),
            |_| {},
        );
        graph.add_pass(
            "Overwrite",
            PassFlags::COMPUTE,
            PassParameters::new().texture(texture, Access::UAV_COMPUTE),
            |_| {},
        );
        graph.add_pass(
            "Read",
            PassFlags::COMPUTE | PassFlags::NEVER_CULL,
            PassParameters::new().texture(texture, Access::SRV_COMPUTE),
            |_| {},
        );
        graph.dump_graph();
        graph.visualize("Scene \"Color\"");
        graph.visualize("Missing");

        let report = graph.execute().unwrap();
        let dump = report.graph_dump.unwrap();
        assert!(dump.starts_with("digraph G {"));
        assert!(dump.contains("subgraph cluster_Graphics"));
        assert!(dump.contains("p2 -> p3;"));
        assert!(dump.trim_end().ends_with('}'));

        assert_eq!(report.visualizations.len(), 1);
        let (name, timeline) = &report.visualizations[0];
        assert_eq!(name, "Scene \"Color\"");
        assert!(timeline.contains("#1 Write"));
        assert!(timeline.contains("#2 Overwrite"));
        assert!(timeline.contains("#3 Read"));
    }
}
