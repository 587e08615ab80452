use criterion::{black_box, criterion_group, criterion_main, Criterion};
use entityfs_storage::query;

fn bench_compile(c: &mut Criterion) {
    let clauses = query::parse("religion,sex=male,-deceased,id[homer]").unwrap();
    c.bench_function("compile_mixed_clauses", |b| {
        b.iter(|| query::compile(black_box(&clauses), black_box("simpsons")).unwrap())
    });

    let wide = query::parse(
        "a,b,c,d,e,f,g,h,i,j,k=v,l=v,m=v,n=v,o=v,p=v,q=v,r=v,s=v,t=v",
    )
    .unwrap();
    c.bench_function("compile_wide_join_tree", |b| {
        b.iter(|| query::compile(black_box(&wide), black_box("simpsons")).unwrap())
    });
}

criterion_group!(benches, bench_compile);
criterion_main!(benches);
