use std::borrow::Cow;

use wgpu::naga::ShaderStage;

/// Compiles the quad vertex shader that maps texture coordinates through
/// the blit transform.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("blit vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

pub(crate) fn compile_fragment_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("blit fragment"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(FRAGMENT_SHADER_GLSL),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}

/// Four-vertex triangle strip covering the viewport.
///
/// Corners are emitted bottom-left, bottom-right, top-left, top-right. The
/// texture origin is the top-left pixel, so `v` is flipped before the
/// transform is applied.
const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

layout(std140, set = 0, binding = 0) uniform BlitParams {
    mat4 u_transform;
} params;

const vec2 corners[4] = vec2[4](
    vec2(0.0, 0.0),
    vec2(1.0, 0.0),
    vec2(0.0, 1.0),
    vec2(1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 corner = corners[vertex_index];
    vec4 uv = params.u_transform * vec4(corner.x, 1.0 - corner.y, 0.0, 1.0);
    v_uv = uv.xy;
    gl_Position = vec4(corner * 2.0 - vec2(1.0, 1.0), 0.0, 1.0);
}
";

const FRAGMENT_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 outColor;

layout(set = 0, binding = 1) uniform texture2D source_texture;
layout(set = 0, binding = 2) uniform sampler source_sampler;

void main() {
    outColor = texture(sampler2D(source_texture, source_sampler), v_uv);
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use wgpu::naga;

    fn parse(source: &str, stage: ShaderStage) -> naga::Module {
        let module = naga::front::glsl::Frontend::default()
            .parse(&naga::front::glsl::Options::from(stage), source)
            .unwrap_or_else(|err| panic!("{stage:?} shader failed to parse: {err:?}"));
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap_or_else(|err| panic!("{stage:?} shader failed validation: {err:?}"));
        module
    }

    fn bindings(module: &naga::Module) -> Vec<(u32, u32)> {
        let mut bindings: Vec<_> = module
            .global_variables
            .iter()
            .filter_map(|(_, var)| var.binding.as_ref())
            .map(|binding| (binding.group, binding.binding))
            .collect();
        bindings.sort_unstable();
        bindings
    }

    #[test]
    fn vertex_shader_compiles_with_transform_uniform() {
        let module = parse(VERTEX_SHADER_GLSL, ShaderStage::Vertex);
        assert_eq!(module.entry_points.len(), 1);
        assert_eq!(module.entry_points[0].name, "main");
        assert_eq!(bindings(&module), vec![(0, 0)]);
    }

    #[test]
    fn fragment_shader_compiles_with_texture_and_sampler() {
        let module = parse(FRAGMENT_SHADER_GLSL, ShaderStage::Fragment);
        assert_eq!(module.entry_points[0].stage, ShaderStage::Fragment);
        assert_eq!(bindings(&module), vec![(0, 1), (0, 2)]);
    }
}
