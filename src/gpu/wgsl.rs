//! WGSL kernel assembly.
//!
//! Kernels are assembled from snippets contributed by the concrete ops, so
//! every op combination compiles to its own specialized pipeline — the
//! indirect-call alternative costs an order of magnitude on divergent GPU
//! code. Sources are cached per `(key, block size)` by the traverser.
//!
//! Binding plan, group 0:
//!
//! | binding | compression | traversal |
//! |---|---|---|
//! | 0 | node lower bounds | compressed nodes |
//! | 1 | node upper bounds | root scalars |
//! | 2 | left children | launch params |
//! | 3 | ropes | query volumes |
//! | 4 | leaf primitives | image list (if any) |
//! | 5 | compressed nodes (out) | output (primary) |
//! | 6 | root scalars (out) | output (counts) |
//! | 7 | launch params | output (params) |
//! | 8 | transform map (if any) | — |

use wgpu::util::DeviceExt;

use super::{GpuContext, GpuError};
use crate::ops::{
    BoxQuery, CountOp, ImageListOp, MapTransformOp, NeighborListOp, NullTransformOp, OutputOp,
    QueryOp, SelfOp, SphereQuery, TransformOp, TranslateOp,
};

/// Device-side extension of a [`QueryOp`].
pub trait DeviceQueryOp: QueryOp {
    /// Stable name used in the pipeline cache key.
    const KEY: &'static str;
    /// WGSL declarations: binding 3, `Volume`, `query_setup`,
    /// `query_translate`, and `query_overlap`.
    const WGSL: &'static str;
    /// Contents of the volume buffer (binding 3).
    fn volume_bytes(&self) -> Vec<u8>;
}

/// Device-side extension of a [`TranslateOp`].
pub trait DeviceTranslateOp: TranslateOp {
    /// Stable name used in the pipeline cache key.
    const KEY: &'static str;
    /// WGSL declarations: `translate_shift` and, if needed, binding 4.
    const WGSL: &'static str;
    /// Contents of the image buffer (binding 4), or `None` if the op binds
    /// no buffer.
    fn image_bytes(&self) -> Option<Vec<u8>>;
}

/// Device-side extension of a [`TransformOp`].
pub trait DeviceTransformOp: TransformOp {
    /// Stable name used in the pipeline cache key.
    const KEY: &'static str;
    /// WGSL declarations: `transform_primitive` and, if needed, binding 8.
    const WGSL: &'static str;
    /// Contents of the map buffer (binding 8), or `None`.
    fn map_bytes(&self) -> Option<Vec<u8>>;
}

/// Device buffers backing an output op for one traversal.
#[derive(Debug)]
pub struct OutputBuffers {
    pub(crate) primary: wgpu::Buffer,
    pub(crate) counts: Option<wgpu::Buffer>,
    pub(crate) params: Option<wgpu::Buffer>,
    pub(crate) queries: usize,
}

/// Device-side extension of an [`OutputOp`].
pub trait DeviceOutputOp: OutputOp {
    /// Stable name used in the pipeline cache key.
    const KEY: &'static str;
    /// WGSL declarations: output bindings from 5 up, a `var<private>`
    /// account, `output_process`, and `output_finalize`.
    const WGSL: &'static str;
    /// (Re)create device storage for `queries` queries.
    fn prepare_device(&mut self, ctx: &GpuContext, queries: usize);
    /// Bind-group entries for the output bindings.
    fn entries(&self) -> Vec<wgpu::BindGroupEntry<'_>>;
    /// Copy device results back into host storage.
    fn download(&mut self, ctx: &GpuContext) -> Result<(), GpuError>;
}

// ---------------------------------------------------------------------------
// query ops
// ---------------------------------------------------------------------------

impl DeviceQueryOp for SphereQuery {
    const KEY: &'static str = "sphere";
    const WGSL: &'static str = r#"
@group(0) @binding(3) var<storage, read> query_volumes: array<vec4<f32>>;

alias Volume = vec4<f32>;

fn query_setup(q: u32) -> Volume {
    return query_volumes[q];
}

fn query_translate(v: Volume, shift: vec3<f32>) -> Volume {
    return vec4<f32>(v.xyz + shift, v.w);
}

fn query_overlap(v: Volume, lo: vec3<f32>, hi: vec3<f32>) -> bool {
    let d = clamp(v.xyz, lo, hi) - v.xyz;
    return dot(d, d) <= v.w * v.w;
}
"#;

    fn volume_bytes(&self) -> Vec<u8> {
        let raw: Vec<[f32; 4]> = self.spheres().iter().map(|s| s.to_array()).collect();
        bytemuck::cast_slice(&raw).to_vec()
    }
}

impl DeviceQueryOp for BoxQuery {
    const KEY: &'static str = "box";
    const WGSL: &'static str = r#"
@group(0) @binding(3) var<storage, read> query_volumes: array<vec4<f32>>;

struct Volume {
    lo: vec3<f32>,
    hi: vec3<f32>,
}

fn query_setup(q: u32) -> Volume {
    var v: Volume;
    v.lo = query_volumes[2u * q].xyz;
    v.hi = query_volumes[2u * q + 1u].xyz;
    return v;
}

fn query_translate(v: Volume, shift: vec3<f32>) -> Volume {
    var r: Volume;
    r.lo = v.lo + shift;
    r.hi = v.hi + shift;
    return r;
}

fn query_overlap(v: Volume, lo: vec3<f32>, hi: vec3<f32>) -> bool {
    return all(v.lo <= hi) && all(v.hi >= lo);
}
"#;

    fn volume_bytes(&self) -> Vec<u8> {
        let mut raw: Vec<[f32; 4]> = Vec::with_capacity(self.boxes().len() * 2);
        for (lo, hi) in self.boxes() {
            raw.push([lo.x, lo.y, lo.z, 0.0]);
            raw.push([hi.x, hi.y, hi.z, 0.0]);
        }
        bytemuck::cast_slice(&raw).to_vec()
    }
}

// ---------------------------------------------------------------------------
// translate ops
// ---------------------------------------------------------------------------

impl DeviceTranslateOp for SelfOp {
    const KEY: &'static str = "self";
    const WGSL: &'static str = r#"
fn translate_shift(i: u32) -> vec3<f32> {
    return vec3<f32>(0.0);
}
"#;

    fn image_bytes(&self) -> Option<Vec<u8>> {
        None
    }
}

impl DeviceTranslateOp for ImageListOp {
    const KEY: &'static str = "images";
    const WGSL: &'static str = r#"
@group(0) @binding(4) var<storage, read> image_shifts: array<vec4<f32>>;

fn translate_shift(i: u32) -> vec3<f32> {
    if (i == 0u) {
        return vec3<f32>(0.0);
    }
    return image_shifts[i - 1u].xyz;
}
"#;

    fn image_bytes(&self) -> Option<Vec<u8>> {
        let mut raw: Vec<[f32; 4]> = (1..self.size())
            .map(|i| {
                let s = self.shift(i);
                [s.x, s.y, s.z, 0.0]
            })
            .collect();
        if raw.is_empty() {
            // keep the binding non-empty when only the identity image exists
            raw.push([0.0; 4]);
        }
        Some(bytemuck::cast_slice(&raw).to_vec())
    }
}

// ---------------------------------------------------------------------------
// transform ops
// ---------------------------------------------------------------------------

impl DeviceTransformOp for NullTransformOp {
    const KEY: &'static str = "null";
    const WGSL: &'static str = r#"
fn transform_primitive(p: i32) -> i32 {
    return p;
}
"#;

    fn map_bytes(&self) -> Option<Vec<u8>> {
        None
    }
}

impl DeviceTransformOp for MapTransformOp {
    const KEY: &'static str = "map";
    const WGSL: &'static str = r#"
@group(0) @binding(8) var<storage, read> transform_map: array<i32>;

fn transform_primitive(p: i32) -> i32 {
    return transform_map[p];
}
"#;

    fn map_bytes(&self) -> Option<Vec<u8>> {
        Some(bytemuck::cast_slice(self.map()).to_vec())
    }
}

// ---------------------------------------------------------------------------
// output ops
// ---------------------------------------------------------------------------

impl DeviceOutputOp for CountOp {
    const KEY: &'static str = "count";
    const WGSL: &'static str = r#"
@group(0) @binding(5) var<storage, read_write> out_counts: array<u32>;

var<private> account_count: u32 = 0u;

fn output_process(q: u32, primitive: i32, image: u32) {
    account_count = account_count + 1u;
}

fn output_finalize(q: u32) {
    out_counts[q] = account_count;
}
"#;

    fn prepare_device(&mut self, ctx: &GpuContext, queries: usize) {
        let size = (queries * 4).max(4) as u64;
        let stale = self.device.as_ref().map_or(true, |d| d.primary.size() != size);
        if stale {
            let primary = ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("overlap counts"),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            self.device = Some(OutputBuffers {
                primary,
                counts: None,
                params: None,
                queries,
            });
        } else if let Some(d) = self.device.as_mut() {
            d.queries = queries;
        }
    }

    fn entries(&self) -> Vec<wgpu::BindGroupEntry<'_>> {
        let d = self.device.as_ref().expect("prepare_device not called");
        vec![wgpu::BindGroupEntry {
            binding: 5,
            resource: d.primary.as_entire_binding(),
        }]
    }

    fn download(&mut self, ctx: &GpuContext) -> Result<(), GpuError> {
        let (queries, bytes) = {
            let d = match self.device.as_ref() {
                Some(d) => d,
                None => return Ok(()),
            };
            (d.queries, ctx.read_buffer(&d.primary, (d.queries * 4).max(4) as u64)?)
        };
        let counts: Vec<u32> = bytemuck::cast_slice(&bytes)[..queries].to_vec();
        self.set_counts(counts);
        Ok(())
    }
}

impl DeviceOutputOp for NeighborListOp {
    const KEY: &'static str = "neighborlist";
    const WGSL: &'static str = r#"
struct ListParams {
    capacity: u32,
}

@group(0) @binding(5) var<storage, read_write> out_neighbors: array<i32>;
@group(0) @binding(6) var<storage, read_write> out_counts: array<u32>;
@group(0) @binding(7) var<uniform> list_params: ListParams;

var<private> account_count: u32 = 0u;

fn output_process(q: u32, primitive: i32, image: u32) {
    if (account_count < list_params.capacity) {
        out_neighbors[q * list_params.capacity + account_count] = primitive;
    }
    account_count = account_count + 1u;
}

fn output_finalize(q: u32) {
    out_counts[q] = account_count;
}
"#;

    fn prepare_device(&mut self, ctx: &GpuContext, queries: usize) {
        let list_size = (queries * self.capacity() * 4).max(4) as u64;
        let count_size = (queries * 4).max(4) as u64;
        let stale = self
            .device
            .as_ref()
            .map_or(true, |d| d.primary.size() != list_size);
        if stale {
            let primary = ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("neighbor list"),
                size: list_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let counts = ctx.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some("neighbor counts"),
                size: count_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });
            let params = ctx
                .device()
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("neighbor list params"),
                    contents: bytemuck::cast_slice(&[self.capacity() as u32, 0, 0, 0]),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            self.device = Some(OutputBuffers {
                primary,
                counts: Some(counts),
                params: Some(params),
                queries,
            });
        } else if let Some(d) = self.device.as_mut() {
            d.queries = queries;
        }
    }

    fn entries(&self) -> Vec<wgpu::BindGroupEntry<'_>> {
        let d = self.device.as_ref().expect("prepare_device not called");
        vec![
            wgpu::BindGroupEntry {
                binding: 5,
                resource: d.primary.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 6,
                resource: d.counts.as_ref().unwrap().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 7,
                resource: d.params.as_ref().unwrap().as_entire_binding(),
            },
        ]
    }

    fn download(&mut self, ctx: &GpuContext) -> Result<(), GpuError> {
        let (queries, list_bytes, count_bytes) = {
            let d = match self.device.as_ref() {
                Some(d) => d,
                None => return Ok(()),
            };
            let list_size = (d.queries * self.capacity() * 4).max(4) as u64;
            let count_size = (d.queries * 4).max(4) as u64;
            (
                d.queries,
                ctx.read_buffer(&d.primary, list_size)?,
                ctx.read_buffer(d.counts.as_ref().unwrap(), count_size)?,
            )
        };
        let neighbors: Vec<i32> = bytemuck::cast_slice(&list_bytes)[..queries * self.capacity()].to_vec();
        let counts: Vec<u32> = bytemuck::cast_slice(&count_bytes)[..queries].to_vec();
        self.set_results(neighbors, counts);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// kernel sources
// ---------------------------------------------------------------------------

const SENTINEL_DECL: &str = "const SENTINEL: i32 = -2147483647 - 1;\n";

/// Cache key for a traversal pipeline over this op combination.
pub fn traversal_key<Q: DeviceQueryOp, T: DeviceTranslateOp, O: DeviceOutputOp>() -> String {
    format!("traverse/{}/{}/{}", Q::KEY, T::KEY, O::KEY)
}

/// Assemble the traversal kernel for one op combination and block size.
pub fn traversal_source<Q: DeviceQueryOp, T: DeviceTranslateOp, O: DeviceOutputOp>(
    block: u32,
) -> String {
    format!(
        r#"// rope traversal kernel, one thread per query
{sentinel}
struct TraverseParams {{
    root: i32,
    n_queries: u32,
    n_images: u32,
    pad: u32,
}}

@group(0) @binding(0) var<storage, read> nodes: array<vec4<i32>>;
@group(0) @binding(1) var<storage, read> tree_bounds: array<vec4<f32>>;
@group(0) @binding(2) var<uniform> params: TraverseParams;
{query}
{translate}
{output}
fn bin_fields(word: u32) -> vec3<u32> {{
    return vec3<u32>((word >> 20u) & 0x3ffu, (word >> 10u) & 0x3ffu, word & 0x3ffu);
}}

@compute @workgroup_size({block})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let q = gid.x;
    if (q >= params.n_queries) {{
        return;
    }}

    let lo0 = tree_bounds[0].xyz;
    let hi0 = tree_bounds[1].xyz;
    let bin = tree_bounds[2].xyz;
    let volume = query_setup(q);

    // prime the active-image mask against the root volume; images never
    // re-enter the mask
    var active_mask: u32 = 0u;
    for (var i: u32 = 0u; i < params.n_images; i = i + 1u) {{
        if (query_overlap(query_translate(volume, translate_shift(i)), lo0, hi0)) {{
            active_mask = active_mask | (1u << i);
        }}
    }}

    var node: i32 = params.root;
    while (node != SENTINEL && active_mask != 0u) {{
        let n = nodes[node];
        let lo = lo0 + vec3<f32>(bin_fields(u32(n.x))) * bin;
        let hi = lo0 + vec3<f32>(bin_fields(u32(n.y)) + vec3<u32>(1u)) * bin;
        let leaf = n.z < 0;

        var hit = false;
        var bits = active_mask;
        while (bits != 0u) {{
            let i = countTrailingZeros(bits);
            bits = bits & (bits - 1u);
            if (query_overlap(query_translate(volume, translate_shift(i)), lo, hi)) {{
                hit = true;
                if (leaf) {{
                    output_process(q, ~n.z, i);
                }}
            }}
        }}

        if (hit && !leaf) {{
            node = n.z;
        }} else {{
            node = n.w;
        }}
    }}

    output_finalize(q);
}}
"#,
        sentinel = SENTINEL_DECL,
        query = Q::WGSL,
        translate = T::WGSL,
        output = O::WGSL,
        block = block,
    )
}

/// Cache key for a compression pipeline over this transform op.
pub fn compression_key<M: DeviceTransformOp>() -> String {
    format!("compress/{}", M::KEY)
}

/// Assemble the compression kernel for one transform op and block size.
pub fn compression_source<M: DeviceTransformOp>(block: u32) -> String {
    format!(
        r#"// node compression kernel, one thread per node
struct CompressParams {{
    n_internal: u32,
    n_nodes: u32,
    root: u32,
    pad: u32,
}}

@group(0) @binding(0) var<storage, read> tree_lo: array<vec4<f32>>;
@group(0) @binding(1) var<storage, read> tree_hi: array<vec4<f32>>;
@group(0) @binding(2) var<storage, read> tree_left: array<i32>;
@group(0) @binding(3) var<storage, read> tree_rope: array<i32>;
@group(0) @binding(4) var<storage, read> tree_prim: array<i32>;
@group(0) @binding(5) var<storage, read_write> nodes: array<vec4<i32>>;
@group(0) @binding(6) var<storage, read_write> tree_bounds: array<vec4<f32>>;
@group(0) @binding(7) var<uniform> params: CompressParams;
{transform}
fn next_up(x: f32) -> f32 {{
    return bitcast<f32>(bitcast<u32>(x) + 1u);
}}

// bin width widened so the top bin edge decodes at or past the root bound
fn conservative_bin(lo0: f32, hi0: f32) -> f32 {{
    var bin = (hi0 - lo0) / 1024.0;
    while (lo0 + 1024.0 * bin < hi0) {{
        bin = next_up(bin);
    }}
    return bin;
}}

// returns (lo_bin, hi_bin); the decoded interval contains [lo, hi]
fn quantize_axis(lo: f32, hi: f32, lo0: f32, bin: f32) -> vec2<u32> {{
    if (bin == 0.0) {{
        return vec2<u32>(0u, 0u);
    }}
    var lo_bin = i32(clamp(floor((lo - lo0) / bin), 0.0, 1023.0));
    while (lo_bin > 0 && lo0 + f32(lo_bin) * bin > lo) {{
        lo_bin = lo_bin - 1;
    }}
    var hi_bin = i32(clamp(ceil((hi - lo0) / bin) - 1.0, 0.0, 1023.0));
    hi_bin = max(hi_bin, lo_bin);
    while (hi_bin < 1023 && lo0 + f32(hi_bin + 1) * bin < hi) {{
        hi_bin = hi_bin + 1;
    }}
    return vec2<u32>(u32(lo_bin), u32(hi_bin));
}}

@compute @workgroup_size({block})
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let idx = gid.x;
    if (idx >= params.n_nodes) {{
        return;
    }}

    let root = params.root;
    let lo0 = tree_lo[root].xyz;
    let hi0 = tree_hi[root].xyz;
    let bin = vec3<f32>(
        conservative_bin(lo0.x, hi0.x),
        conservative_bin(lo0.y, hi0.y),
        conservative_bin(lo0.z, hi0.z),
    );
    if (idx == root) {{
        tree_bounds[0] = vec4<f32>(lo0, 0.0);
        tree_bounds[1] = vec4<f32>(hi0, 0.0);
        tree_bounds[2] = vec4<f32>(bin, 0.0);
    }}

    let lo = tree_lo[idx].xyz;
    let hi = tree_hi[idx].xyz;
    let bx = quantize_axis(lo.x, hi.x, lo0.x, bin.x);
    let by = quantize_axis(lo.y, hi.y, lo0.y, bin.y);
    let bz = quantize_axis(lo.z, hi.z, lo0.z, bin.z);
    let lo_word = (bx.x << 20u) | (by.x << 10u) | bz.x;
    let hi_word = (bx.y << 20u) | (by.y << 10u) | bz.y;

    var z: i32;
    if (idx >= params.n_internal) {{
        z = ~transform_primitive(tree_prim[idx - params.n_internal]);
    }} else {{
        z = tree_left[idx];
    }}

    nodes[idx] = vec4<i32>(i32(lo_word), i32(hi_word), z, tree_rope[idx]);
}}
"#,
        transform = M::WGSL,
        block = block,
    )
}
