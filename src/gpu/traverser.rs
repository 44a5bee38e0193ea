//! The traverser facade: owns the compressed tree on the device and issues
//! the compression and traversal kernels.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use super::wgsl::{
    compression_key, compression_source, traversal_key, traversal_source, DeviceOutputOp,
    DeviceQueryOp, DeviceTransformOp, DeviceTranslateOp,
};
use super::{GpuContext, GpuError};
use crate::autotune::{Autotuner, AutotunerConfig};
use crate::compress::CompressedLbvh;
use crate::node::CompressedNode;
use crate::ops::{NullTransformOp, SelfOp};
use crate::traverse::MAX_IMAGES;
use crate::tree::Lbvh;
use crate::Error;

const NODE_SIZE: u64 = std::mem::size_of::<CompressedNode>() as u64;
const BOUNDS_SIZE: u64 = 3 * 16;

/// Raw device handles to a compressed tree, for advanced callers that feed
/// the buffers into their own kernels.
#[derive(Debug, Clone, Copy)]
pub struct CompressedHandles<'a> {
    /// Root node index.
    pub root: i32,
    /// Number of valid nodes in `nodes`.
    pub len: usize,
    /// Compressed node array (16 bytes per node).
    pub nodes: &'a wgpu::Buffer,
    /// Root scalars: `lo`, `hi`, `bin`, one `vec4<f32>` each.
    pub bounds: &'a wgpu::Buffer,
}

/// Compresses an LBVH into the 16-byte-per-node traversal format and walks
/// it for batches of queries.
///
/// The compressed buffer, the root scalars, and the two kernel autotuners
/// are owned per instance. Compression happens eagerly in
/// [`setup`](Self::setup) or lazily on the first [`traverse`](Self::traverse);
/// after a `setup` the instance replays the cached tree until
/// [`reset`](Self::reset), so callers must not mutate the source tree in
/// between (or must `reset` when they do).
///
/// All kernel launches are asynchronous on the context's queue; results are
/// observed by downloading an output op or syncing the context.
pub struct LbvhTraverser {
    ctx: GpuContext,
    root: i32,
    n_nodes: usize,
    nodes: Option<wgpu::Buffer>,
    bounds: wgpu::Buffer,
    pipelines: HashMap<(String, u32), wgpu::ComputePipeline>,
    tune_compress: Autotuner,
    tune_traverse: Autotuner,
    replay: bool,
}

impl LbvhTraverser {
    /// Create a traverser on a fresh device.
    pub fn new() -> Result<Self, GpuError> {
        Ok(Self::with_context(GpuContext::new()?))
    }

    /// Create a traverser on a shared device.
    pub fn with_context(ctx: GpuContext) -> Self {
        let bounds = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("tree bounds"),
            size: BOUNDS_SIZE,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let max_block = ctx.max_workgroup_size();
        let mut tune_compress = Autotuner::new("compress kernel", AutotunerConfig::default());
        tune_compress.restrict(max_block);
        let mut tune_traverse = Autotuner::new("traverse kernel", AutotunerConfig::default());
        tune_traverse.restrict(max_block);

        LbvhTraverser {
            ctx,
            root: crate::tree::LBVH_SENTINEL,
            n_nodes: 0,
            nodes: None,
            bounds,
            pipelines: HashMap::new(),
            tune_compress,
            tune_traverse,
            replay: false,
        }
    }

    /// The device this traverser runs on.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Eagerly compress `tree` and replay it for subsequent traversals.
    pub fn setup(&mut self, tree: &Lbvh) -> Result<(), Error> {
        self.setup_with(&NullTransformOp, tree)
    }

    /// [`setup`](Self::setup) with a primitive transform.
    pub fn setup_with<M: DeviceTransformOp>(&mut self, transform: &M, tree: &Lbvh) -> Result<(), Error> {
        if tree.primitive_count() == 0 {
            return Ok(());
        }
        self.compress(transform, tree)?;
        self.replay = true;
        Ok(())
    }

    /// Clear the replay flag; the next traversal recompresses its tree.
    pub fn reset(&mut self) {
        self.replay = false;
    }

    /// Configure both kernel autotuners.
    pub fn set_autotuner_params(&mut self, enabled: bool, period: u32) {
        self.tune_traverse.set_enabled(enabled);
        self.tune_traverse.set_period(period);
        self.tune_compress.set_enabled(enabled);
        self.tune_compress.set_period(period);
    }

    /// Traverse with the untranslated query volumes only.
    pub fn traverse<O, Q>(&mut self, out: &mut O, query: &Q, tree: &Lbvh) -> Result<(), Error>
    where
        O: DeviceOutputOp,
        Q: DeviceQueryOp,
    {
        self.traverse_with(out, query, &NullTransformOp, tree, &SelfOp)
    }

    /// Traverse `tree` for every query across every image.
    ///
    /// Emits every primitive whose compressed AABB overlaps a translated
    /// query volume into `out` (one device-side record per overlapping
    /// image). Empty inputs are silent no-ops; more than
    /// [`MAX_IMAGES`](crate::traverse::MAX_IMAGES) images is an error raised
    /// before any launch. The launch is asynchronous; call
    /// [`DeviceOutputOp::download`] to fetch results.
    pub fn traverse_with<O, Q, M, I>(
        &mut self,
        out: &mut O,
        query: &Q,
        transform: &M,
        tree: &Lbvh,
        images: &I,
    ) -> Result<(), Error>
    where
        O: DeviceOutputOp,
        Q: DeviceQueryOp,
        M: DeviceTransformOp,
        I: DeviceTranslateOp,
    {
        if tree.primitive_count() == 0 || query.size() == 0 || images.size() == 0 {
            return Ok(());
        }
        if images.size() > MAX_IMAGES {
            return Err(Error::TooManyImages(images.size()));
        }

        if !self.replay {
            self.setup_with(transform, tree)?;
        }

        let device = self.ctx.device().clone();
        let volume_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("query volumes"),
            contents: &query.volume_bytes(),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let image_buf = images.image_bytes().map(|bytes| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("image shifts"),
                contents: &bytes,
                usage: wgpu::BufferUsages::STORAGE,
            })
        });
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("traverse params"),
            contents: bytemuck::cast_slice(&[
                self.root as u32,
                query.size() as u32,
                images.size() as u32,
                0,
            ]),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        out.prepare(query.size());
        out.prepare_device(&self.ctx, query.size());

        let block = self.tune_traverse.begin();
        let key = (traversal_key::<Q, I, O>(), block);
        if !self.pipelines.contains_key(&key) {
            let source = traversal_source::<Q, I, O>(block);
            let pipeline = create_pipeline(&device, &source, "traverse kernel");
            self.pipelines.insert(key.clone(), pipeline);
        }
        self.tune_traverse.rearm();

        {
            let pipeline = &self.pipelines[&key];
            let nodes = self.nodes.as_ref().expect("compressed before traversal");
            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.bounds.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: volume_buf.as_entire_binding(),
                },
            ];
            if let Some(buf) = &image_buf {
                entries.push(wgpu::BindGroupEntry {
                    binding: 4,
                    resource: buf.as_entire_binding(),
                });
            }
            entries.extend(out.entries());

            dispatch(
                &self.ctx,
                pipeline,
                &entries,
                workgroups(query.size(), block),
                "traverse",
            );
        }

        if self.tune_traverse.measuring() {
            self.ctx.sync();
        }
        self.tune_traverse.end();
        Ok(())
    }

    /// Raw device handles to the compressed tree, once one exists.
    pub fn data(&self) -> Option<CompressedHandles<'_>> {
        self.nodes.as_ref().map(|nodes| CompressedHandles {
            root: self.root,
            len: self.n_nodes,
            nodes,
            bounds: &self.bounds,
        })
    }

    /// Download the compressed tree into host memory.
    ///
    /// Blocks on the device; mainly for inspection and validation.
    pub fn download(&self) -> Result<CompressedLbvh, Error> {
        let nodes = match &self.nodes {
            Some(buf) => buf,
            None => {
                return Ok(CompressedLbvh::new(
                    crate::tree::LBVH_SENTINEL,
                    Vec::new(),
                    glam::Vec3::ZERO,
                    glam::Vec3::ZERO,
                    glam::Vec3::ZERO,
                ))
            }
        };
        let node_bytes = self.ctx.read_buffer(nodes, self.n_nodes as u64 * NODE_SIZE)?;
        let bounds_bytes = self.ctx.read_buffer(&self.bounds, BOUNDS_SIZE)?;

        let nodes: Vec<CompressedNode> = bytemuck::cast_slice(&node_bytes).to_vec();
        let scalars: &[f32] = bytemuck::cast_slice(&bounds_bytes);
        let lo = glam::Vec3::new(scalars[0], scalars[1], scalars[2]);
        let hi = glam::Vec3::new(scalars[4], scalars[5], scalars[6]);
        let bin = glam::Vec3::new(scalars[8], scalars[9], scalars[10]);
        Ok(CompressedLbvh::new(self.root, nodes, lo, hi, bin))
    }

    /// Issue the compression kernel for `tree`.
    fn compress<M: DeviceTransformOp>(&mut self, transform: &M, tree: &Lbvh) -> Result<(), Error> {
        let n_nodes = tree.node_count();
        let device = self.ctx.device().clone();

        // grow-only node storage
        let needed = n_nodes as u64 * NODE_SIZE;
        if self.nodes.as_ref().map_or(true, |b| b.size() < needed) {
            self.nodes = Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("compressed nodes"),
                size: needed,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            }));
        }
        self.root = tree.root();
        self.n_nodes = n_nodes;

        let pad = |v: &[glam::Vec3]| -> Vec<[f32; 4]> {
            v.iter().map(|p| [p.x, p.y, p.z, 0.0]).collect()
        };
        let upload = |label: &str, contents: &[u8]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE,
            })
        };
        let lo_buf = upload("tree lo", bytemuck::cast_slice(&pad(tree.lo())));
        let hi_buf = upload("tree hi", bytemuck::cast_slice(&pad(tree.hi())));
        let left_buf = upload("tree left", bytemuck::cast_slice(tree.left()));
        let rope_buf = upload("tree rope", bytemuck::cast_slice(tree.rope()));
        let prim_buf = upload("tree primitives", bytemuck::cast_slice(tree.primitive()));
        let map_buf = transform.map_bytes().map(|bytes| upload("transform map", &bytes));
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("compress params"),
            contents: bytemuck::cast_slice(&[
                tree.internal_count() as u32,
                n_nodes as u32,
                tree.root() as u32,
                0,
            ]),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let block = self.tune_compress.begin();
        let key = (compression_key::<M>(), block);
        if !self.pipelines.contains_key(&key) {
            let source = compression_source::<M>(block);
            let pipeline = create_pipeline(&device, &source, "compress kernel");
            self.pipelines.insert(key.clone(), pipeline);
        }
        self.tune_compress.rearm();

        {
            let pipeline = &self.pipelines[&key];
            let nodes = self.nodes.as_ref().unwrap();
            let mut entries = vec![
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lo_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: hi_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: left_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: rope_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: prim_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: nodes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: self.bounds.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: params_buf.as_entire_binding(),
                },
            ];
            if let Some(buf) = &map_buf {
                entries.push(wgpu::BindGroupEntry {
                    binding: 8,
                    resource: buf.as_entire_binding(),
                });
            }

            dispatch(
                &self.ctx,
                pipeline,
                &entries,
                workgroups(n_nodes, block),
                "compress",
            );
        }

        if self.tune_compress.measuring() {
            self.ctx.sync();
        }
        self.tune_compress.end();
        Ok(())
    }
}

fn workgroups(items: usize, block: u32) -> u32 {
    (items as u32 + block - 1) / block
}

fn create_pipeline(device: &wgpu::Device, source: &str, label: &str) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: None,
        module: &module,
        entry_point: Some("main"),
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

fn dispatch(
    ctx: &GpuContext,
    pipeline: &wgpu::ComputePipeline,
    entries: &[wgpu::BindGroupEntry<'_>],
    workgroups: u32,
    label: &str,
) {
    let bind_group = ctx.device().create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &pipeline.get_bind_group_layout(0),
        entries,
    });
    let mut encoder = ctx
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }
    ctx.queue().submit(std::iter::once(encoder.finish()));
}
