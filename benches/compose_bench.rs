use criterion::{black_box, criterion_group, criterion_main, Criterion};

use domshot::{compose, escape, DomShot, RenderRequest};

fn sample_markup(rows: usize) -> String {
    let mut html = String::from("<body>\n<table>\n");
    for i in 0..rows {
        html.push_str(&format!(
            "  <tr><td class=\"n\">{i}</td><td>row \"{i}\" \\ value</td></tr>\n"
        ));
    }
    html.push_str("</table>\n</body>");
    html
}

fn bench_escape(c: &mut Criterion) {
    let markup = sample_markup(2000);
    c.bench_function("escape_large_markup", |b| {
        b.iter(|| escape(black_box(&markup)))
    });
}

fn bench_compose(c: &mut Criterion) {
    let request = RenderRequest::builder()
        .viewport(1280, 720)
        .css("td { padding: 2px; }\n.n { color: #888; }")
        .html(sample_markup(200))
        .inline_script("document.title = 'bench';")
        .output_path("/tmp/bench.png")
        .build()
        .expect("failed to build request");

    c.bench_function("compose_render_script", |b| {
        b.iter(|| compose(black_box(&request)))
    });
}

fn bench_dom_shot_script(c: &mut Criterion) {
    let mut shot = DomShot::new();
    shot.load_css("p { margin: 0; }");
    shot.load_html(&sample_markup(50));
    shot.set_global("series", &(0..500).collect::<Vec<u32>>())
        .expect("failed to set global");

    c.bench_function("dom_shot_script", |b| {
        b.iter(|| shot.script("/tmp/bench.png").expect("compose failed"))
    });
}

criterion_group!(benches, bench_escape, bench_compose, bench_dom_shot_script);
criterion_main!(benches);
