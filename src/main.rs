fn main() {
    runtrack_lib::run()
}
