use criterion::{black_box, criterion_group, criterion_main, Criterion};
use n8n_doctor::env::Environment;
use n8n_doctor::patch::{backup_path_for, FieldPath};
use n8n_doctor::probe::{probe_matrix, ProbeResult};
use n8n_doctor::recommend::recommend;
use n8n_doctor::script::find_assignment;

fn synthetic_script(lines: usize) -> String {
    let mut source = String::with_capacity(lines * 48);
    for i in 0..lines {
        source.push_str(&format!("const handler_{i:05} = require('./handlers/{i}');\n"));
        if i % 50 == 0 {
            source.push_str("// webhookUrl = 'http://commented/out';\n");
            source.push_str("if (webhookUrl === undefined) { throw new Error('x'); }\n");
        }
    }
    source.push_str("const webhookUrl = 'http://localhost:5678/webhook/compile-video';\n");
    source
}

fn synthetic_probes(bases: usize) -> Vec<ProbeResult> {
    let bases: Vec<String> = (0..bases)
        .map(|i| format!("http://host-{i:03}:5678"))
        .collect();
    let paths: Vec<String> = ["/webhook/compile-video", "/webhook-test/compile-video", "/hooks/x"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    probe_matrix(&bases, &paths)
        .into_iter()
        .enumerate()
        .map(|(i, url)| {
            let status = match i % 4 {
                0 => Some(404),
                1 => Some(500),
                2 => None,
                _ => Some(200),
            };
            ProbeResult {
                url,
                http_method: "POST".to_string(),
                status_code: status,
                latency_ms: (i % 97) as u64,
                error_message: status.is_none().then(|| "connection refused".to_string()),
                response_excerpt: None,
            }
        })
        .collect()
}

fn bench_find_assignment(c: &mut Criterion) {
    let source = synthetic_script(5_000);
    c.bench_function("find_assignment_large_script", |b| {
        b.iter(|| {
            let found = find_assignment(black_box(&source), "webhookUrl");
            black_box(found);
        });
    });
}

fn bench_recommend(c: &mut Criterion) {
    let env = Environment::from_lookup(|_| None);
    let probes = synthetic_probes(400);
    c.bench_function("recommend_1200_probes", |b| {
        b.iter(|| {
            let recs = recommend(&env, black_box(&probes), &[], &[]);
            black_box(recs.len());
        });
    });
}

fn bench_field_path(c: &mut Criterion) {
    let doc = serde_json::json!({
        "mcpServers": {"n8n-video-compilation": {"env": {"N8N_BASE_URL": "http://localhost:5678"}}}
    });
    let field = FieldPath::parse("mcpServers.n8n-video-compilation.env.N8N_BASE_URL");
    c.bench_function("field_path_get", |b| {
        b.iter(|| {
            black_box(field.get(black_box(&doc)));
            black_box(backup_path_for(std::path::Path::new("config/mcp-config.json"), 1));
        });
    });
}

criterion_group!(perf_core, bench_find_assignment, bench_recommend, bench_field_path);
criterion_main!(perf_core);
