mod passes;

use criterion::criterion_main;

criterion_main!(passes::benches);
