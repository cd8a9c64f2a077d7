fn main() {
    uniffi::generate_scaffolding("src/peercall.udl").unwrap();
}
