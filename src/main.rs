fn main() {
    segcam::run_cli();
}
