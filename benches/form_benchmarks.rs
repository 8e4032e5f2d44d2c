use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use formdoc_core::{
    apply, apply_json, inspect, lexer::Lexer, parse, parser::FormParser, patch::ScalarInput,
    serialize, Patch, SerializeOptions,
};

// ============================================================================
// Test Data: Varying Complexity and Size
// ============================================================================

const TINY_FORM: &str = r#"{% form id="tiny" %}
{% group id="g" %}
{% string-field id="name" required=true %}
{% /string-field %}
{% /group %}
{% /form %}
"#;

const MEDIUM_FORM: &str = r#"---
form:
  roles: [user, agent]
  role_instructions:
    agent: Fill in what you can find publicly.
---
# Vendor review

{% form id="vendor" title="Vendor review" %}

{% description ref="vendor" %}
Collects the facts needed before signing with a vendor.
{% /description %}

{% group id="company" title="Company" %}

{% string-field id="legal_name" label="Legal name" required=true %}
```value
Acme Corp
```
{% /string-field %}

{% url-field id="website" label="Website" %}
```value
https://acme.example
```
{% /url-field %}

{% year-field id="founded" label="Founded" min=1800 %}
{% /year-field %}

{% single-select id="size" label="Size" required=true %}
- [ ] Small {% #small %}
- [x] Medium {% #medium %}
- [ ] Large {% #large %}
{% /single-select %}

{% /group %}

{% group id="risk" title="Risk" %}

{% checkboxes id="controls" label="Controls" checkboxMode="explicit" required=true %}
- [y] Encrypts data at rest {% #encryption %}
- [ ] Has SOC 2 report {% #soc2 %}
- [n] Uses subprocessors {% #subprocessors %}
{% /checkboxes %}

{% string-list id="concerns" label="Concerns" maxItems=5 %}
```value
Single region
Slow support
```
{% /string-list %}

{% table-field id="incidents" label="Incidents" columnIds=["when", "summary", "severity"] columnTypes=["date", "string", "number"] requiredColumns=["when"] %}
| When | Summary | Severity |
|------|---------|----------|
| 2023-04-01 | Outage | 2 |
| 2024-01-15 | Leak | 4 |
{% /table-field %}

{% /group %}

{% /form %}
"#;

// Generate a form with many fields for scaling runs
fn generate_form(field_count: usize) -> String {
    let mut form = String::from("{% form id=\"big\" %}\n{% group id=\"g\" %}\n\n");
    for i in 0..field_count {
        form.push_str(&format!(
            "{{% number-field id=\"n{i}\" label=\"Number {i}\" min=0 %}}\n```value\n{}\n```\n{{% /number-field %}}\n\n",
            i * 10
        ));
    }
    form.push_str("{% /group %}\n{% /form %}\n");
    form
}

// ============================================================================
// Lexer Benchmarks
// ============================================================================

fn bench_lexer_tag(c: &mut Criterion) {
    let tag = r#"table-field id="incidents" columnIds=["when", "summary"] minRows=1 required=true"#;
    c.bench_function("lexer_tag", |b| {
        b.iter(|| {
            let mut lexer = Lexer::new(black_box(tag));
            lexer.lex()
        })
    });
}

// ============================================================================
// Parser Benchmarks
// ============================================================================

fn bench_parser_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_by_size");

    for (name, source) in [("tiny", TINY_FORM), ("medium", MEDIUM_FORM)] {
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, src| {
            b.iter(|| FormParser::new(black_box(src)).parse_document())
        });
    }

    group.finish();
}

fn bench_parser_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser_field_scaling");

    for size in [10, 50, 100, 500] {
        let source = generate_form(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, src| {
            b.iter(|| FormParser::new(black_box(src)).parse_document())
        });
    }

    group.finish();
}

// ============================================================================
// End-to-End Benchmarks
// ============================================================================

fn bench_e2e_inspect(c: &mut Criterion) {
    let form = parse(MEDIUM_FORM, "vendor.form.md").unwrap();
    c.bench_function("e2e_inspect", |b| b.iter(|| inspect(black_box(&form))));
}

fn bench_e2e_apply(c: &mut Criterion) {
    let form = parse(MEDIUM_FORM, "vendor.form.md").unwrap();
    let batch = vec![
        Patch::SetYear {
            field_id: "founded".to_string(),
            value: Some(ScalarInput::from(1921.0)),
        },
        Patch::AppendItem {
            field_id: "concerns".to_string(),
            value: "No status page".to_string(),
        },
    ];

    c.bench_function("e2e_apply", |b| {
        b.iter(|| apply(black_box(&form), black_box(batch.clone())))
    });

    let json = r#"[{"op": "set_year", "field_id": "founded", "value": 1921}]"#;
    c.bench_function("e2e_apply_json", |b| {
        b.iter(|| apply_json(black_box(&form), black_box(json)))
    });
}

fn bench_e2e_serialize(c: &mut Criterion) {
    let form = parse(MEDIUM_FORM, "vendor.form.md").unwrap();
    let (form, _) = apply(
        &form,
        vec![Patch::SetString {
            field_id: "legal_name".to_string(),
            value: Some("Acme Holdings".to_string()),
        }],
    );

    let mut group = c.benchmark_group("e2e_serialize");
    for (name, options) in [
        ("regenerate", SerializeOptions::regenerate()),
        ("preserve", SerializeOptions::preserve()),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &options, |b, opts| {
            b.iter(|| serialize(black_box(&form), opts))
        });
    }
    group.finish();
}

fn bench_e2e_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("e2e_parse_to_json_scaling");

    for size in [10, 100, 500] {
        let source = generate_form(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, src| {
            b.iter(|| {
                let form = parse(black_box(src), "big.form.md").unwrap();
                form.to_json().unwrap()
            })
        });
    }

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(lexer_benches, bench_lexer_tag);

criterion_group!(parser_benches, bench_parser_sizes, bench_parser_scaling);

criterion_group!(
    e2e_benches,
    bench_e2e_inspect,
    bench_e2e_apply,
    bench_e2e_serialize,
    bench_e2e_scaling
);

criterion_main!(lexer_benches, parser_benches, e2e_benches);
