fn main() {
    std::process::exit(sqlpipe::run());
}
