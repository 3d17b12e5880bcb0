fn main() {
    sailtrack_lib::run()
}
