// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Must match the pipeline's vertex layout:
    //   binding 0, location 0: R32G32B32_SFLOAT (position)
    //   binding 0, location 1: R32G32_SFLOAT (uv)
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec2 inUv;

layout(set = 0, binding = 0) uniform Camera {
    mat4 view;
    mat4 proj;
} cam;

layout(push_constant) uniform Push {
    mat4 model;
    uint texture_index;
    float wireframe;
    uint flags;
} pc;

layout(location = 0) out vec2 vUv;

void main() {
    vUv = inUv;
    gl_Position = cam.proj * cam.view * pc.model * vec4(inPos, 1.0);
}
"#;

    // Edges come from barycentrics; `wireframe` fades from solid (0) to
    // edges only (1).
    let fs_src = r#"
#version 450
#extension GL_EXT_fragment_shader_barycentric : require

const uint UNTEXTURED = 1u;
const uint SHOW_UV = 2u;

layout(set = 0, binding = 1) uniform sampler2D textures[16];

layout(push_constant) uniform Push {
    mat4 model;
    uint texture_index;
    float wireframe;
    uint flags;
} pc;

layout(location = 0) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    vec3 base;
    if ((pc.flags & SHOW_UV) != 0u) {
        base = vec3(fract(vUv), 0.0);
    } else if ((pc.flags & UNTEXTURED) != 0u) {
        base = vec3(0.8);
    } else {
        base = texture(textures[pc.texture_index], vUv).rgb;
    }

    vec3 b = gl_BaryCoordEXT;
    vec3 d = fwidth(b);
    vec3 a = smoothstep(vec3(0.0), d * 1.5, b);
    float edge = 1.0 - min(min(a.x, a.y), a.z);

    float alpha = mix(1.0, edge, pc.wireframe);
    if (alpha < 0.01) {
        discard;
    }
    vec3 color = mix(base, vec3(1.0), edge * pc.wireframe);
    outColor = vec4(color, alpha);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (vs_src, shaderc::ShaderKind::Vertex, "standard.vert"),
        (fs_src, shaderc::ShaderKind::Fragment, "standard.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap();
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    println!("cargo:rerun-if-changed=build.rs");
}
