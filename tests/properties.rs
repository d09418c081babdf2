mod common;

use std::collections::HashMap;

use arbor_graph::{
    CompiledGraph,
    backend::{RecordedCommand, RecordingBackend},
    framegraph::{Access, Lifetime, PassHandle, ResourceOrigin, TextureHandle},
};
use common::*;
use rstest::rstest;

/// Knuth's MMIX constants; good enough to shuffle test graphs.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }

    fn chance(&mut self, percent: u64) -> bool {
        self.next() % 100 < percent
    }
}

struct Texture {
    latest: TextureHandle,
    touched_by: Vec<PassHandle>,
}

/// A random graph together with what the test expects of it.
struct Generated {
    graph: CompiledGraph<RecordingBackend>,
    textures: Vec<Texture>,
    /// (producer, consumer) pairs.
    edges: Vec<(PassHandle, PassHandle)>,
}

const SIDES: [u32; 4] = [64, 128, 256, 512];

fn generate(seed: u64, backend: &mut RecordingBackend) -> Generated {
    let mut rng = Lcg(seed);
    let mut builder = builder(backend, 2);
    let mut textures: Vec<Texture> = Vec::new();
    let mut writers: HashMap<usize, PassHandle> = HashMap::new();
    let mut edges = Vec::new();

    let pass_count = 12 + rng.below(13);
    for p in 0..pass_count {
        let pass = builder.add_pass(format!("pass{p}"));

        if !textures.is_empty() {
            for _ in 0..rng.below(3) {
                let t = rng.below(textures.len());
                builder
                    .read_texture(pass, textures[t].latest, Access::PixelShader)
                    .unwrap();
                textures[t].touched_by.push(pass);
                edges.push((writers[&t], pass));
            }

            if rng.chance(30) {
                let t = rng.below(textures.len());
                textures[t].latest = builder
                    .write_texture(pass, textures[t].latest, Access::RenderTarget)
                    .unwrap();
                textures[t].touched_by.push(pass);
                edges.push((writers[&t], pass));
                writers.insert(t, pass);
            }
        }

        if textures.is_empty() || rng.chance(70) {
            let side = SIDES[rng.below(SIDES.len())];
            let name = format!("t{}", textures.len());
            let desc = if rng.chance(50) {
                cleared_target(&name, side, side)
            } else {
                target(&name, side, side)
            };
            let latest = builder.create_texture(pass, desc).unwrap();
            writers.insert(textures.len(), pass);
            textures.push(Texture {
                latest,
                touched_by: vec![pass],
            });
        }
    }

    let graph = builder.build(backend).unwrap();
    Generated {
        graph,
        textures,
        edges,
    }
}

fn overlaps(a: (u64, u64), b: (u64, u64)) -> bool {
    a.0 < b.0 + b.1 && b.0 < a.0 + a.1
}

#[rstest]
#[case(1)]
#[case(7)]
#[case(42)]
#[case(1234)]
#[case(0xdead_beef)]
fn producers_run_before_consumers(#[case] seed: u64) {
    let mut backend = RecordingBackend::default();
    let generated = generate(seed, &mut backend);
    let graph = &generated.graph;

    for &(producer, consumer) in &generated.edges {
        let producer = graph.final_index(producer).unwrap();
        let consumer = graph.final_index(consumer).unwrap();
        assert!(producer < consumer, "{producer} must run before {consumer}");
    }

    generated.graph.destroy(&mut backend);
}

#[rstest]
#[case(3)]
#[case(99)]
#[case(2024)]
#[case(0x5eed)]
fn lifetimes_span_exactly_their_users(#[case] seed: u64) {
    let mut backend = RecordingBackend::default();
    let generated = generate(seed, &mut backend);
    let graph = &generated.graph;

    for texture in &generated.textures {
        let indices: Vec<usize> = texture
            .touched_by
            .iter()
            .map(|&pass| graph.final_index(pass).unwrap())
            .collect();
        let expected = Lifetime {
            start: *indices.iter().min().unwrap(),
            end: *indices.iter().max().unwrap(),
        };
        assert_eq!(graph.lifetime(texture.latest), Some(expected));
    }

    generated.graph.destroy(&mut backend);
}

#[rstest]
#[case(5)]
#[case(17)]
#[case(31337)]
#[case(0xfeed_f00d)]
fn aliased_textures_never_share_live_memory(#[case] seed: u64) {
    let mut backend = RecordingBackend::default();
    let generated = generate(seed, &mut backend);
    let graph = &generated.graph;

    let placed: Vec<_> = graph
        .resources()
        .iter()
        .filter(|resource| resource.origin == ResourceOrigin::Graph)
        .collect();

    for (i, a) in placed.iter().enumerate() {
        for b in &placed[i + 1..] {
            if overlaps((a.offset_bytes, a.size_bytes), (b.offset_bytes, b.size_bytes)) {
                let (la, lb) = (a.lifetime.unwrap(), b.lifetime.unwrap());
                assert!(
                    !la.intersects(&lb),
                    "'{}' {} and '{}' {} share memory",
                    a.name(),
                    la,
                    b.name(),
                    lb
                );
            }
        }
        assert!(a.offset_bytes + a.size_bytes <= graph.frame_heap_size_bytes());
    }

    let total: u64 = placed.iter().map(|resource| resource.size_bytes).sum();
    let buckets: u64 = graph.alias_plan().buckets.iter().map(|b| b.size_bytes).sum();
    assert!(graph.frame_heap_size_bytes() <= total);
    assert_eq!(graph.frame_heap_size_bytes(), buckets);

    generated.graph.destroy(&mut backend);
}

#[rstest]
#[case(11)]
#[case(256)]
#[case(0xabcd)]
fn barriers_are_needed_and_continuous(#[case] seed: u64) {
    let mut backend = RecordingBackend::default();
    let generated = generate(seed, &mut backend);
    let graph = &generated.graph;

    for slot in 0..graph.frames_in_flight() {
        let cmd = backend.begin_command_list();
        graph.render(&mut backend, cmd, slot);

        let mut states = HashMap::new();
        let mut count = 0;
        for command in backend.commands(cmd) {
            let RecordedCommand::Barriers(barriers) = command else {
                continue;
            };
            assert!(!barriers.is_empty());
            for barrier in barriers {
                assert_ne!(barrier.before, barrier.after);
                if let Some(previous) = states.insert(barrier.texture, barrier.after) {
                    assert_eq!(previous, barrier.before);
                }
                count += 1;
            }
        }
        assert_eq!(count, graph.barrier_count());
    }

    generated.graph.destroy(&mut backend);
}

#[rstest]
#[case(8)]
#[case(77)]
#[case(0xc0ffee)]
fn identical_declarations_compile_identically(#[case] seed: u64) {
    let mut first_backend = RecordingBackend::default();
    let mut second_backend = RecordingBackend::default();
    let first = generate(seed, &mut first_backend);
    let second = generate(seed, &mut second_backend);

    assert_eq!(first.graph.report(), second.graph.report());
    assert_eq!(first.graph.alias_plan(), second.graph.alias_plan());

    first.graph.destroy(&mut first_backend);
    second.graph.destroy(&mut second_backend);
}
